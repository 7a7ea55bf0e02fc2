use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{TaskStore, TaskSubmitter};
use waypoint_core::types::{AsyncRequest, ProcessRef, Request, SystemContext, TaskInstance};

/// Persists async tasks and hands them to the out-of-band executor.
///
/// A task is always persisted before it is submitted, so a backend that
/// dequeues the work can find its record by id.
pub struct AsyncTaskCoordinator {
    store: Arc<dyn TaskStore>,
    submitter: Arc<dyn TaskSubmitter>,
}

impl AsyncTaskCoordinator {
    pub fn new(store: Arc<dyn TaskStore>, submitter: Arc<dyn TaskSubmitter>) -> Self {
        Self { store, submitter }
    }

    /// Persist and submit a task for `activity_id`. Returns its id without
    /// waiting for completion.
    ///
    /// `kind` names the delegation the backend should run.
    pub async fn process_async_task(
        &self,
        activity_id: &str,
        kind: &str,
        system_context: &SystemContext,
        request: Request,
        process_ref: Option<ProcessRef>,
    ) -> Result<Uuid> {
        let task = TaskInstance {
            id: Uuid::new_v4(),
            request: request.clone(),
            system_context: system_context.clone(),
            process_ref,
            activity_id: activity_id.to_string(),
            created_at: Utc::now(),
        };

        let task_id = self.store.persist(&task).await.map_err(|e| match e {
            WaypointError::Persistence(_) => e,
            other => WaypointError::Persistence(other.to_string()),
        })?;
        debug!(activity_id, task_id = %task_id, "Task persisted");

        let submitted = self.submitter.submit(AsyncRequest {
            task_id,
            activity_id: activity_id.to_string(),
            kind: kind.to_string(),
            request,
            system_context: task.system_context,
        });

        if let Err(e) = submitted {
            // Nothing will ever complete this task, drop the record
            if let Err(cleanup) = self.store.remove(task_id).await {
                warn!(task_id = %task_id, error = %cleanup, "Failed to remove unsubmitted task");
            }
            return Err(match e {
                WaypointError::Submission(_) => e,
                other => WaypointError::Submission(other.to_string()),
            });
        }

        info!(activity_id, task_id = %task_id, "Async task submitted");
        Ok(task_id)
    }

    /// Load a pending task by id.
    pub async fn load(&self, task_id: Uuid) -> Result<TaskInstance> {
        self.store
            .load(task_id)
            .await?
            .ok_or_else(|| WaypointError::TaskNotFound(task_id.to_string()))
    }

    /// Drop a task once its callback has been recorded.
    pub async fn complete(&self, task_id: Uuid) -> Result<()> {
        if !self.store.remove(task_id).await? {
            return Err(WaypointError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id = %task_id, "Task completed");
        Ok(())
    }
}
