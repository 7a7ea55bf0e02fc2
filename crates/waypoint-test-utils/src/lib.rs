//! Mocks and fixtures shared by the Waypoint test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{ModelExecutor, TaskStore, TaskSubmitter, ToolExecutor};
use waypoint_core::types::{AsyncRequest, ModelDelta, ModelRequest, SystemContext, TaskInstance};

/// Tool that returns a canned output and counts its calls.
pub struct MockTool {
    name: String,
    output: Value,
    calls: Arc<AtomicUsize>,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Value::Object(Map::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the output. Non-object values are wrapped as `{"value": ..}`.
    pub fn returning(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Handle for observing how many times `run` was called.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ToolExecutor for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _parameters: Map<String, Value>,
        _ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = match self.output.clone() {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Box::pin(async move { Ok(output) })
    }
}

/// Tool that always returns an execution error.
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToolExecutor for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _parameters: Map<String, Value>,
        _ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        Box::pin(async move {
            Err(WaypointError::ToolExecution {
                tool: self.name.clone(),
                message: "mock failure".into(),
            })
        })
    }
}

/// Tool that panics when run.
pub struct PanickingTool {
    name: String,
}

impl PanickingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToolExecutor for PanickingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _parameters: Map<String, Value>,
        _ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        Box::pin(async move { panic!("{} exploded", self.name) })
    }
}

/// Tool that sleeps before returning.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

impl ToolExecutor for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _parameters: Map<String, Value>,
        _ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(Map::new())
        })
    }
}

/// Model that streams a canned reply word by word.
pub struct MockModel {
    name: String,
    reply: String,
    calls: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: reply.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ModelExecutor for MockModel {
    fn model(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        _request: ModelRequest,
        _ctx: &SystemContext,
    ) -> BoxStream<'_, Result<ModelDelta>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let words: Vec<&str> = self.reply.split(' ').collect();
        let mut deltas: Vec<Result<ModelDelta>> = words
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let text = if i == 0 { w.to_string() } else { format!(" {}", w) };
                Ok(ModelDelta::Text(text))
            })
            .collect();
        deltas.push(Ok(ModelDelta::Usage {
            input_tokens: 10,
            output_tokens: words.len() as u64,
        }));
        deltas.push(Ok(ModelDelta::Stop("end_turn".into())));

        Box::pin(futures::stream::iter(deltas))
    }
}

/// In-memory task store. Can be switched into a failing mode.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, TaskInstance>>,
    fail: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `persist` call fail.
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tasks.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskStore for MemoryTaskStore {
    fn persist(&self, task: &TaskInstance) -> BoxFuture<'_, Result<Uuid>> {
        let task = task.clone();
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WaypointError::Persistence("mock store offline".into()));
            }
            let id = task.id;
            self.tasks.lock().unwrap().insert(id, task);
            Ok(id)
        })
    }

    fn load(&self, id: Uuid) -> BoxFuture<'_, Result<Option<TaskInstance>>> {
        Box::pin(async move { Ok(self.tasks.lock().unwrap().get(&id).cloned()) })
    }

    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.tasks.lock().unwrap().remove(&id).is_some()) })
    }
}

/// Submitter that records requests instead of running them.
///
/// When built with [`RecordingSubmitter::checking`], it also records whether
/// each task was already in the store at submission time.
#[derive(Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<AsyncRequest>>,
    persisted_first: Mutex<Vec<bool>>,
    store: Option<Arc<MemoryTaskStore>>,
    fail: bool,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checking(store: Arc<MemoryTaskStore>) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn submitted(&self) -> Vec<AsyncRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn persisted_first(&self) -> Vec<bool> {
        self.persisted_first.lock().unwrap().clone()
    }
}

impl TaskSubmitter for RecordingSubmitter {
    fn submit(&self, request: AsyncRequest) -> Result<()> {
        if self.fail {
            return Err(WaypointError::Submission("mock queue closed".into()));
        }
        if let Some(store) = &self.store {
            self.persisted_first
                .lock()
                .unwrap()
                .push(store.contains(request.task_id));
        }
        self.submitted.lock().unwrap().push(request);
        Ok(())
    }
}
