use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ProcessRef, StepResult, SystemContext};
use waypoint_delegate::Delegations;

use super::branch::next_nodes;
use super::node::{FlowGraph, FlowNode};
use crate::context::NodeContext;
use crate::coordinator::AsyncTaskCoordinator;
use crate::step::StepExecutor;
use crate::worker::Callback;

/// One node visit in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct NodeVisit {
    pub node_id: String,
    pub result: StepResult,
    pub elapsed_ms: u64,
}

/// How a run (or a resumed leg of one) ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The worklist drained.
    Completed {
        run_id: String,
        trace: Vec<NodeVisit>,
        context: SystemContext,
    },
    /// A node handed its work off. Resume with the task's result.
    Paused {
        run_id: String,
        task_id: Uuid,
        node_id: String,
        trace: Vec<NodeVisit>,
        context: SystemContext,
    },
}

impl RunOutcome {
    pub fn trace(&self) -> &[NodeVisit] {
        match self {
            Self::Completed { trace, .. } | Self::Paused { trace, .. } => trace,
        }
    }

    pub fn context(&self) -> &SystemContext {
        match self {
            Self::Completed { context, .. } | Self::Paused { context, .. } => context,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused { .. })
    }
}

/// Mutable state of one leg of a run.
struct Walk {
    run_id: String,
    context: SystemContext,
    frontier: VecDeque<String>,
    visits: HashMap<String, usize>,
    trace: Vec<NodeVisit>,
}

/// Drives a [`FlowGraph`], calling the step executor once per node visit.
///
/// Starting from the root, each visited node runs its partial steps and
/// terminal step, then every successor selected by its branches is queued.
/// When a step hands its work off asynchronously the run pauses and is
/// continued later through [`FlowRunner::resume`].
pub struct FlowRunner {
    delegations: Delegations,
    coordinator: Option<Arc<AsyncTaskCoordinator>>,
    max_node_visits: usize,
}

impl FlowRunner {
    pub fn new(delegations: Delegations) -> Self {
        Self {
            delegations,
            coordinator: None,
            max_node_visits: 0,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<AsyncTaskCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Stop revisiting a node after `max` visits. 0 disables the guard.
    pub fn with_max_node_visits(mut self, max: usize) -> Self {
        self.max_node_visits = max;
        self
    }

    /// Run `graph` from its root.
    pub async fn run(
        &self,
        graph: &FlowGraph,
        system_context: SystemContext,
    ) -> Result<RunOutcome> {
        self.check_kinds(graph)?;

        let walk = Walk {
            run_id: Uuid::new_v4().to_string(),
            context: system_context,
            frontier: VecDeque::from([graph.root().to_string()]),
            visits: HashMap::new(),
            trace: Vec::new(),
        };
        info!(run_id = %walk.run_id, root = graph.root(), nodes = graph.len(), "Starting flow run");

        self.walk(graph, walk, None).await
    }

    /// Continue a paused run with the result of its async task.
    ///
    /// The task record is removed once the callback visit is recorded, so
    /// each task resumes its run at most once. If the run fails before that
    /// point the record stays and the resume can be retried.
    pub async fn resume(
        &self,
        graph: &FlowGraph,
        task_id: Uuid,
        result: StepResult,
    ) -> Result<RunOutcome> {
        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| WaypointError::Config("resume requires a task coordinator".into()))?;
        self.check_kinds(graph)?;

        let task = coordinator.load(task_id).await?;
        let process_ref = task.process_ref.ok_or_else(|| {
            WaypointError::InvalidRequest(format!("task {} has no process reference", task_id))
        })?;
        info!(
            run_id = %process_ref.run_id,
            node_id = %process_ref.node_id,
            task_id = %task_id,
            "Resuming flow run"
        );

        let walk = Walk {
            run_id: process_ref.run_id,
            context: task.system_context,
            frontier: process_ref.frontier.into(),
            visits: process_ref.visits,
            trace: Vec::new(),
        };
        let callback = Callback {
            task_id,
            activity_id: process_ref.node_id,
            result,
        };
        self.walk(graph, walk, Some(callback)).await
    }

    /// Run `graph`, waiting on `callbacks` and resuming after every pause.
    ///
    /// The trace of the returned outcome spans every leg of the run.
    pub async fn run_to_completion(
        &self,
        graph: &FlowGraph,
        system_context: SystemContext,
        callbacks: &mut mpsc::Receiver<Callback>,
        max_wait: Duration,
    ) -> Result<RunOutcome> {
        let mut trace = Vec::new();
        let mut outcome = self.run(graph, system_context).await?;

        loop {
            match outcome {
                RunOutcome::Completed {
                    run_id,
                    trace: tail,
                    context,
                } => {
                    trace.extend(tail);
                    return Ok(RunOutcome::Completed {
                        run_id,
                        trace,
                        context,
                    });
                }
                RunOutcome::Paused {
                    task_id,
                    trace: tail,
                    ..
                } => {
                    trace.extend(tail);
                    let callback = wait_for(task_id, callbacks, max_wait).await?;
                    outcome = self.resume(graph, task_id, callback.result).await?;
                }
            }
        }
    }

    fn executor(&self, kind: &str) -> Result<StepExecutor> {
        let delegation = self
            .delegations
            .get(kind)
            .ok_or_else(|| WaypointError::Config(format!("unknown delegation kind: {}", kind)))?;
        let executor = StepExecutor::new(delegation);
        Ok(match &self.coordinator {
            Some(coordinator) => executor.with_coordinator(Arc::clone(coordinator)),
            None => executor,
        })
    }

    fn check_kinds(&self, graph: &FlowGraph) -> Result<()> {
        for node in graph.nodes() {
            for kind in node.kinds() {
                if self.delegations.get(kind).is_none() {
                    return Err(WaypointError::Config(format!(
                        "node {} uses unknown delegation kind: {}",
                        node.id, kind
                    )));
                }
            }
        }
        Ok(())
    }

    async fn walk(
        &self,
        graph: &FlowGraph,
        mut walk: Walk,
        mut resume: Option<Callback>,
    ) -> Result<RunOutcome> {
        loop {
            let (node_id, callback) = match resume.take() {
                Some(callback) => (callback.activity_id.clone(), Some(callback)),
                None => match walk.frontier.pop_front() {
                    Some(node_id) => (node_id, None),
                    None => break,
                },
            };
            let node = graph.node(&node_id)?;

            if callback.is_none() {
                let count = walk.visits.entry(node_id.clone()).or_insert(0);
                *count += 1;
                if self.max_node_visits > 0 && *count > self.max_node_visits {
                    warn!(
                        node_id = %node_id,
                        max = self.max_node_visits,
                        "Node visit limit reached, not visiting again"
                    );
                    continue;
                }
            }

            let resumed_task = callback.as_ref().map(|c| c.task_id);
            let (result, paused) = self
                .visit(node, &mut walk, callback.map(|c| c.result))
                .await?;

            if let (Some(task_id), Some(coordinator)) = (resumed_task, &self.coordinator) {
                coordinator.complete(task_id).await?;
            }

            if paused {
                let task_id = result.task_id().ok_or_else(|| {
                    WaypointError::Persistence(format!("node {} paused without a task id", node.id))
                })?;
                info!(
                    run_id = %walk.run_id,
                    node_id = %node.id,
                    task_id = %task_id,
                    "Flow run paused"
                );
                return Ok(RunOutcome::Paused {
                    run_id: walk.run_id,
                    task_id,
                    node_id,
                    trace: walk.trace,
                    context: walk.context,
                });
            }

            for next in next_nodes(graph, node, &walk.context) {
                debug!(from = %node.id, to = %next.id, "Queueing node");
                walk.frontier.push_back(next.id.clone());
            }
        }

        info!(run_id = %walk.run_id, visits = walk.trace.len(), "Flow run completed");
        Ok(RunOutcome::Completed {
            run_id: walk.run_id,
            trace: walk.trace,
            context: walk.context,
        })
    }

    /// Execute one visit of `node`, recording it in the walk's trace.
    async fn visit(
        &self,
        node: &FlowNode,
        walk: &mut Walk,
        callback: Option<StepResult>,
    ) -> Result<(StepResult, bool)> {
        let partials = node
            .partials
            .iter()
            .map(|a| self.executor(&a.kind).map(|e| (e, a)))
            .collect::<Result<Vec<_>>>()?;
        let executor = self.executor(&node.activity.kind)?;

        let started = Instant::now();
        let mut ctx = NodeContext::new(node.id.clone(), std::mem::take(&mut walk.context));
        ctx.process_ref = Some(ProcessRef {
            run_id: walk.run_id.clone(),
            node_id: node.id.clone(),
            frontier: walk.frontier.iter().cloned().collect(),
            visits: walk.visits.clone(),
        });

        for (partial, activity) in partials {
            ctx.request = activity.properties.clone();
            partial.attach(&mut ctx);
        }
        ctx.request = node.activity.properties.clone();
        if let Some(result) = callback {
            ctx.resume_with(result);
        }

        let result = executor.execute(&mut ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            node_id = %node.id,
            success = result.is_success(),
            elapsed_ms,
            "Node visited"
        );

        let paused = ctx.need_pause();
        walk.context = ctx.into_system_context();
        walk.trace.push(NodeVisit {
            node_id: node.id.clone(),
            result: result.clone(),
            elapsed_ms,
        });

        Ok((result, paused))
    }
}

async fn wait_for(
    task_id: Uuid,
    callbacks: &mut mpsc::Receiver<Callback>,
    max_wait: Duration,
) -> Result<Callback> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        match tokio::time::timeout_at(deadline, callbacks.recv()).await {
            Err(_) => {
                return Err(WaypointError::CallbackTimeout {
                    task_id: task_id.to_string(),
                    waited_secs: max_wait.as_secs(),
                })
            }
            Ok(None) => return Err(WaypointError::Submission("callback channel closed".into())),
            Ok(Some(callback)) if callback.task_id == task_id => return Ok(callback),
            Ok(Some(other)) => {
                warn!(task_id = %other.task_id, "Ignoring callback for another task");
            }
        }
    }
}
