use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invoke mode not set for activity: {0}")]
    MissingInvokeMode(String),

    // Resolution errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    // Delegation errors
    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Model invocation failed: {model}: {message}")]
    ModelInvocation { model: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Delegation panicked: {0}")]
    DelegationPanic(String),

    // Async task errors
    #[error("Task persistence failed: {0}")]
    Persistence(String),

    #[error("Task submission failed: {0}")]
    Submission(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("No callback for task {task_id} after {waited_secs}s")]
    CallbackTimeout { task_id: String, waited_secs: u64 },

    // Graph errors
    #[error("Node not found in graph: {0}")]
    NodeNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification attached to failed step results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing or malformed configuration. Fatal for the visit.
    Configuration,
    /// Unknown tool or model. Recoverable by the caller.
    System,
    /// The delegation itself failed.
    Execution,
    /// The async task could not be persisted or submitted.
    Persistence,
}

impl WaypointError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::ConfigNotFound(_) | Self::MissingInvokeMode(_) => {
                ErrorClass::Configuration
            }
            Self::ToolNotFound(_) | Self::ModelNotFound(_) | Self::NodeNotFound(_) => {
                ErrorClass::System
            }
            Self::ToolExecution { .. }
            | Self::ToolTimeout { .. }
            | Self::ModelInvocation { .. }
            | Self::InvalidRequest(_)
            | Self::DelegationPanic(_)
            | Self::Json(_) => ErrorClass::Execution,
            Self::Persistence(_)
            | Self::Submission(_)
            | Self::TaskNotFound(_)
            | Self::Database(_)
            | Self::CallbackTimeout { .. }
            | Self::Io(_) => ErrorClass::Persistence,
        }
    }
}

pub type Result<T> = std::result::Result<T, WaypointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_are_system_class() {
        assert_eq!(
            WaypointError::ToolNotFound("search".into()).class(),
            ErrorClass::System
        );
        assert_eq!(
            WaypointError::ModelNotFound("gpt".into()).class(),
            ErrorClass::System
        );
    }

    #[test]
    fn missing_invoke_mode_is_configuration() {
        let err = WaypointError::MissingInvokeMode("n1".into());
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(err.to_string(), "Invoke mode not set for activity: n1");
    }
}
