use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorClass, WaypointError};

/// A lazily evaluated, single-valued result of one step.
///
/// Nothing runs until the future is polled, and it always resolves to
/// exactly one [`StepResult`].
pub type ResultStream = BoxFuture<'static, StepResult>;

/// How a fresh activity is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeMode {
    /// Complete inline and return the delegation's result.
    #[default]
    Sync,
    /// Persist a task, schedule it out of band, and pause the run.
    Async,
}

impl std::fmt::Display for InvokeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// The request handed to a delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub invoke_mode: InvokeMode,
    #[serde(default)]
    pub param: serde_json::Map<String, serde_json::Value>,
}

impl Request {
    pub fn new(invoke_mode: InvokeMode) -> Self {
        Self {
            invoke_mode,
            param: serde_json::Map::new(),
        }
    }

    /// Inject the activity-specific parameter map.
    pub fn with_param(mut self, param: serde_json::Map<String, serde_json::Value>) -> Self {
        self.param = param;
        self
    }
}

/// Serializable error carried by a failed [`StepResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&WaypointError> for StepError {
    fn from(err: &WaypointError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of a single step: success with data, or failure with an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<StepError>,
}

impl StepResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn fail(err: &WaypointError) -> Self {
        Self::fail_with(StepError::from(err))
    }

    pub fn fail_with(error: StepError) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error),
        }
    }

    /// The synthetic result returned when a task has been handed off.
    pub fn accepted(task_id: Uuid) -> Self {
        Self::success(serde_json::json!({
            "status": "accepted",
            "task_id": task_id.to_string(),
        }))
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// Task id of an accepted result, if this is one.
    pub fn task_id(&self) -> Option<Uuid> {
        if self.data.get("status").and_then(|v| v.as_str()) != Some("accepted") {
            return None;
        }
        self.data
            .get("task_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Mutable state shared by every node of one workflow run.
///
/// Not designed for concurrent mutation. Callers that run branches in
/// parallel must serialize writes to the per-node outputs themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemContext {
    #[serde(default)]
    pub invoke_mode: Option<InvokeMode>,
    /// Id of the activity currently executing.
    #[serde(default)]
    pub current_executor: Option<String>,
    #[serde(default)]
    per_node_outputs: HashMap<String, StepResult>,
    #[serde(default)]
    request_parameters: HashMap<String, serde_json::Value>,
}

impl SystemContext {
    pub fn new(invoke_mode: InvokeMode) -> Self {
        Self {
            invoke_mode: Some(invoke_mode),
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.request_parameters = params;
        self
    }

    /// Record the result of an activity.
    pub fn save_inter_output(&mut self, activity_id: impl Into<String>, result: StepResult) {
        self.per_node_outputs.insert(activity_id.into(), result);
    }

    pub fn output(&self, activity_id: &str) -> Option<&StepResult> {
        self.per_node_outputs.get(activity_id)
    }

    pub fn outputs(&self) -> &HashMap<String, StepResult> {
        &self.per_node_outputs
    }

    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.request_parameters.get(key)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.request_parameters.insert(key.into(), value);
    }

    pub fn parameters(&self) -> &HashMap<String, serde_json::Value> {
        &self.request_parameters
    }

    /// Resolve a dotted path against the context.
    ///
    /// The first segment names either an activity (its result is viewed as
    /// `{success, data, error}`) or a request parameter. Activities win on
    /// collision.
    pub fn lookup(&self, path: &str) -> Option<serde_json::Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;

        let mut current = match self.per_node_outputs.get(head) {
            Some(result) => serde_json::to_value(result).ok()?,
            None => self.request_parameters.get(head)?.clone(),
        };

        for segment in segments {
            current = match current {
                serde_json::Value::Object(mut obj) => obj.remove(segment)?,
                serde_json::Value::Array(mut arr) => {
                    let idx: usize = segment.parse().ok()?;
                    if idx >= arr.len() {
                        return None;
                    }
                    arr.swap_remove(idx)
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Where a paused run stopped, stored opaquely on its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRef {
    pub run_id: String,
    /// Node that was executing when the run paused.
    pub node_id: String,
    /// Nodes still queued for traversal after `node_id`.
    #[serde(default)]
    pub frontier: Vec<String>,
    /// Visits per node so far in this run.
    #[serde(default)]
    pub visits: HashMap<String, usize>,
}

/// Persisted unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub request: Request,
    pub system_context: SystemContext,
    pub process_ref: Option<ProcessRef>,
    pub activity_id: String,
    pub created_at: DateTime<Utc>,
}

/// Work handed to the out-of-band executor.
#[derive(Debug, Clone)]
pub struct AsyncRequest {
    pub task_id: Uuid,
    pub activity_id: String,
    /// Delegation kind that should run the request.
    pub kind: String,
    pub request: Request,
    pub system_context: SystemContext,
}

/// Role in a model conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

/// A single message sent to a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }
}

/// Typed request for a model delegation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// A streaming delta from a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    /// A chunk of text content.
    Text(String),
    /// Usage information.
    Usage { input_tokens: u64, output_tokens: u64 },
    /// The response is complete.
    Stop(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A model's full response after its stream has been drained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}
