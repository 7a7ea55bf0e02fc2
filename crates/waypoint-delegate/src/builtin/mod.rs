pub mod counter;
pub mod echo;

use std::sync::Arc;

use waypoint_core::traits::{ModelExecutor, ToolExecutor};

/// Built-in tools, registered by `ToolRegistry::with_builtins`.
pub fn tools() -> Vec<Arc<dyn ToolExecutor>> {
    vec![
        Arc::new(echo::EchoTool),
        Arc::new(counter::CounterTool),
    ]
}

/// Built-in models, registered by `ModelRegistry::with_builtins`.
pub fn models() -> Vec<Arc<dyn ModelExecutor>> {
    vec![Arc::new(echo::EchoModel)]
}
