use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaypointError};
use crate::types::InvokeMode;

/// Top-level Waypoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: ExecutionConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Invoke mode for new runs.
    #[serde(default)]
    pub invoke_mode: InvokeMode,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Runaway guard for cyclic flows. 0 disables it.
    #[serde(default)]
    pub max_node_visits: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            invoke_mode: InvokeMode::default(),
            tool_timeout_secs: default_tool_timeout(),
            max_node_visits: 0,
        }
    }
}

fn default_tool_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// SQLite file for task records. In-memory when unset.
    #[serde(default)]
    pub store_path: Option<String>,
    #[serde(default = "default_callback_max_wait")]
    pub callback_max_wait_secs: u64,
    #[serde(default = "default_worker_queue")]
    pub worker_queue: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            callback_max_wait_secs: default_callback_max_wait(),
            worker_queue: default_worker_queue(),
        }
    }
}

fn default_callback_max_wait() -> u64 { 300 }
fn default_worker_queue() -> usize { 64 }

impl TaskConfig {
    pub fn callback_max_wait(&self) -> Duration {
        Duration::from_secs(self.callback_max_wait_secs)
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store_path.as_deref().map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "waypoint=info,warn".to_string() }

impl EngineConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WaypointError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WaypointError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
