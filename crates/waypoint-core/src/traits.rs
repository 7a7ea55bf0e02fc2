use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;
use crate::types::*;

/// Tool-style executor, resolved by name.
///
/// Implementations must be safe to call repeatedly across retries and
/// should report ordinary failures through the returned future rather
/// than panicking.
pub trait ToolExecutor: Send + Sync + 'static {
    /// Tool name (registry key).
    fn name(&self) -> &str;

    /// Run the tool with a flat parameter map.
    fn run(
        &self,
        parameters: serde_json::Map<String, serde_json::Value>,
        ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<serde_json::Map<String, serde_json::Value>>>;

    /// Timeout in seconds. `None` defers to the engine configuration.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// Model-style executor, resolved by model name.
pub trait ModelExecutor: Send + Sync + 'static {
    /// Model name (registry key).
    fn model(&self) -> &str;

    /// Send a request and receive a stream of deltas.
    fn invoke(
        &self,
        request: ModelRequest,
        ctx: &SystemContext,
    ) -> BoxStream<'_, Result<ModelDelta>>;
}

/// Durable storage for async task records.
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a task. Must be durable before the future resolves.
    fn persist(&self, task: &TaskInstance) -> BoxFuture<'_, Result<Uuid>>;

    /// Load a task by id.
    fn load(&self, id: Uuid) -> BoxFuture<'_, Result<Option<TaskInstance>>>;

    /// Remove a task once its callback has been consumed.
    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<bool>>;
}

/// Out-of-band execution backend. Fire and forget.
pub trait TaskSubmitter: Send + Sync + 'static {
    fn submit(&self, request: AsyncRequest) -> Result<()>;
}
