//! Resumable execution of one activity.
//!
//! The graph engine calls [`StepExecutor::execute`] once per node visit.
//! The visit either resumes from an async callback, continues from a
//! partial step left on the same node, or runs fresh. Whatever happens,
//! the visit ends with exactly one [`StepResult`], recorded against the
//! activity id in the run's `SystemContext`. Errors never escape as `Err`:
//! they come back as failed results.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{InvokeMode, Request, ResultStream, StepResult};
use waypoint_delegate::Delegation;

use crate::context::{keys, NodeContext, VisitState};
use crate::coordinator::AsyncTaskCoordinator;

/// Executes activities of one delegation kind.
#[derive(Clone)]
pub struct StepExecutor {
    delegation: Arc<dyn Delegation>,
    coordinator: Option<Arc<AsyncTaskCoordinator>>,
}

impl StepExecutor {
    pub fn new(delegation: Arc<dyn Delegation>) -> Self {
        Self {
            delegation,
            coordinator: None,
        }
    }

    /// Enable `ASYNC` invocation through the given coordinator.
    pub fn with_coordinator(mut self, coordinator: Arc<AsyncTaskCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn kind(&self) -> &str {
        self.delegation.kind()
    }

    /// Run one visit of `ctx.activity_id` and return its terminal result.
    pub async fn execute(&self, ctx: &mut NodeContext) -> StepResult {
        let result = match ctx.take_visit_state() {
            VisitState::Resuming(result) => {
                info!(
                    activity_id = %ctx.activity_id,
                    success = result.is_success(),
                    "Resuming from async callback"
                );
                result
            }
            VisitState::Chained(upstream) => {
                let upstream = guarded(upstream).await;
                if upstream.is_success() {
                    self.run_fresh(ctx).await
                } else {
                    info!(
                        activity_id = %ctx.activity_id,
                        "Upstream step failed, skipping"
                    );
                    upstream
                }
            }
            VisitState::Fresh => self.run_fresh(ctx).await,
        };

        ctx.system_context
            .save_inter_output(ctx.activity_id.clone(), result.clone());
        match serde_json::to_value(&result) {
            Ok(value) => {
                ctx.response.insert(keys::INVOKE_RESULT.to_string(), value);
            }
            Err(e) => warn!(activity_id = %ctx.activity_id, error = %e, "Failed to expose result"),
        }

        result
    }

    /// Attach this step as a partial step on the node without running it.
    ///
    /// The request is built now, but the delegation only runs when a later
    /// `execute` on the same node consumes the pending result. If an earlier
    /// partial step fails, this one never runs. Partial steps always run
    /// inline, even in an async run; only the terminal step hands off.
    pub fn attach(&self, ctx: &mut NodeContext) {
        let upstream = ctx.take_pending();

        let own: ResultStream = match self.build_request(ctx) {
            Ok(mut request) => {
                request.invoke_mode = InvokeMode::Sync;
                self.delegation
                    .dispatch(request, ctx.system_context.clone())
            }
            Err(e) => futures::future::ready(StepResult::fail(&e)).boxed(),
        };

        let chained = match upstream {
            Some(upstream) => async move {
                let upstream = guarded(upstream).await;
                if !upstream.is_success() {
                    return upstream;
                }
                guarded(own).await
            }
            .boxed(),
            None => own,
        };
        ctx.attach(chained);
    }

    async fn run_fresh(&self, ctx: &mut NodeContext) -> StepResult {
        let request = match self.build_request(ctx) {
            Ok(request) => request,
            Err(e) => {
                error!(activity_id = %ctx.activity_id, error = %e, "Failed to build request");
                return StepResult::fail(&e);
            }
        };

        match request.invoke_mode {
            InvokeMode::Async => self.hand_off(ctx, request).await,
            InvokeMode::Sync => {
                debug!(
                    activity_id = %ctx.activity_id,
                    kind = self.kind(),
                    "Dispatching step"
                );
                let stream = self.delegation.dispatch(request, ctx.system_context.clone());
                guarded(stream).await
            }
        }
    }

    async fn hand_off(&self, ctx: &mut NodeContext, request: Request) -> StepResult {
        let Some(coordinator) = &self.coordinator else {
            let err = WaypointError::Config(format!(
                "activity {} requested async invocation but no coordinator is configured",
                ctx.activity_id
            ));
            return StepResult::fail(&err);
        };

        match coordinator
            .process_async_task(
                &ctx.activity_id,
                self.kind(),
                &ctx.system_context,
                request,
                ctx.process_ref.clone(),
            )
            .await
        {
            Ok(task_id) => {
                ctx.request_pause();
                StepResult::accepted(task_id)
            }
            Err(e) => {
                error!(activity_id = %ctx.activity_id, error = %e, "Async hand-off failed");
                StepResult::fail(&e)
            }
        }
    }

    fn build_request(&self, ctx: &mut NodeContext) -> Result<Request> {
        let mode = ctx
            .system_context
            .invoke_mode
            .ok_or_else(|| WaypointError::MissingInvokeMode(ctx.activity_id.clone()))?;

        ctx.system_context.current_executor = Some(ctx.activity_id.clone());
        let param = self.delegation.generate_params(&ctx.request)?;
        Ok(Request::new(mode).with_param(param))
    }
}

/// Await a result stream, turning a panic inside it into a failed result.
pub(crate) async fn guarded(stream: ResultStream) -> StepResult {
    match AssertUnwindSafe(stream).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let err = WaypointError::DelegationPanic(panic_message(panic.as_ref()));
            error!(error = %err, "Delegation panicked");
            StepResult::fail(&err)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}
