use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::TaskSubmitter;
use waypoint_core::types::{AsyncRequest, StepResult};
use waypoint_delegate::Delegations;

use crate::step::guarded;

/// Completion report for a submitted task.
#[derive(Debug, Clone)]
pub struct Callback {
    pub task_id: Uuid,
    pub activity_id: String,
    pub result: StepResult,
}

/// Submitter backed by a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelSubmitter {
    tx: mpsc::Sender<AsyncRequest>,
}

impl ChannelSubmitter {
    /// Create a submitter and the receiver an [`AsyncWorker`] drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AsyncRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TaskSubmitter for ChannelSubmitter {
    fn submit(&self, request: AsyncRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                WaypointError::Submission("worker queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                WaypointError::Submission("worker queue is closed".into())
            }
        })
    }
}

/// Runs submitted tasks out of band and reports their results.
pub struct AsyncWorker {
    delegations: Delegations,
}

impl AsyncWorker {
    pub fn new(delegations: Delegations) -> Self {
        Self { delegations }
    }

    /// Drain `requests` until cancelled or the channel closes.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<AsyncRequest>,
        callbacks: mpsc::Sender<Callback>,
        cancel: CancellationToken,
    ) {
        info!("Async worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Async worker shutting down");
                    break;
                }
                next = requests.recv() => {
                    let Some(request) = next else {
                        debug!("Worker queue closed");
                        break;
                    };
                    let callback = self.execute(request).await;
                    if callbacks.send(callback).await.is_err() {
                        warn!("Callback receiver dropped, stopping worker");
                        break;
                    }
                }
            }
        }
    }

    /// Run one submitted request to completion.
    pub async fn execute(&self, request: AsyncRequest) -> Callback {
        let AsyncRequest {
            task_id,
            activity_id,
            kind,
            request,
            mut system_context,
        } = request;

        debug!(task_id = %task_id, activity_id = %activity_id, kind = %kind, "Running async task");

        let result = match self.delegations.get(&kind) {
            Some(delegation) => {
                system_context.current_executor = Some(activity_id.clone());
                guarded(delegation.dispatch(request, system_context)).await
            }
            None => StepResult::fail(&WaypointError::Config(format!(
                "no delegation registered for kind {}",
                kind
            ))),
        };

        Callback {
            task_id,
            activity_id,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use waypoint_core::types::{InvokeMode, Request, SystemContext};
    use waypoint_delegate::{ModelRegistry, ToolRegistry, ToolRequest, GenerateRequest};
    use waypoint_test_utils::MockTool;

    fn delegations() -> Delegations {
        let tools = ToolRegistry::tools();
        tools.register_tool(MockTool::new("slow_job").returning(json!({"done": true})));
        Delegations::standard(
            Arc::new(tools),
            Arc::new(ModelRegistry::models()),
            Duration::from_secs(5),
        )
    }

    fn async_request(kind: &str) -> AsyncRequest {
        let param = ToolRequest::generate_params(
            json!({"tool": "slow_job"}).as_object().unwrap(),
        )
        .unwrap();
        AsyncRequest {
            task_id: Uuid::new_v4(),
            activity_id: "job".into(),
            kind: kind.into(),
            request: Request::new(InvokeMode::Async).with_param(param),
            system_context: SystemContext::new(InvokeMode::Async),
        }
    }

    #[tokio::test]
    async fn worker_reports_callbacks() {
        let (submitter, rx) = ChannelSubmitter::channel(4);
        let (cb_tx, mut cb_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(AsyncWorker::new(delegations()).run(rx, cb_tx, cancel.clone()));

        let request = async_request("tool");
        let task_id = request.task_id;
        submitter.submit(request).unwrap();

        let callback = cb_rx.recv().await.unwrap();
        assert_eq!(callback.task_id, task_id);
        assert_eq!(callback.activity_id, "job");
        assert_eq!(callback.result.data(), &json!({"done": true}));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_kind_fails() {
        let worker = AsyncWorker::new(delegations());
        let callback = worker.execute(async_request("subflow")).await;
        assert!(!callback.result.is_success());
    }

    #[test]
    fn full_queue_is_submission_error() {
        let (submitter, _rx) = ChannelSubmitter::channel(1);
        submitter.submit(async_request("tool")).unwrap();
        let err = submitter.submit(async_request("tool")).unwrap_err();
        assert!(matches!(err, WaypointError::Submission(_)));
    }

    #[test]
    fn closed_queue_is_submission_error() {
        let (submitter, rx) = ChannelSubmitter::channel(1);
        drop(rx);
        assert!(submitter.submit(async_request("tool")).is_err());
    }
}
