use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{ModelExecutor, ToolExecutor};

/// Name-keyed registry of executors.
///
/// Safe to read and write concurrently. Entries are never removed, and the
/// first executor registered under a name wins: later registrations under
/// the same name are logged and ignored.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Register an executor unless the name is already taken.
    ///
    /// Returns `true` if the executor was inserted.
    pub fn register(&self, name: impl Into<String>, executor: Arc<T>) -> bool {
        match self.entries.entry(name.into()) {
            Entry::Occupied(entry) => {
                warn!(
                    kind = self.kind,
                    name = %entry.key(),
                    "Executor already registered, keeping the first registrant"
                );
                false
            }
            Entry::Vacant(entry) => {
                debug!(kind = self.kind, name = %entry.key(), "Executor registered");
                entry.insert(executor);
                true
            }
        }
    }

    /// Get an executor by name.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// List all registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of tool executors, keyed by tool name.
pub type ToolRegistry = Registry<dyn ToolExecutor>;

/// Registry of model executors, keyed by model name.
pub type ModelRegistry = Registry<dyn ModelExecutor>;

impl Registry<dyn ToolExecutor> {
    pub fn tools() -> Self {
        Self::new("tool")
    }

    /// Register a tool under its own name.
    pub fn register_tool(&self, tool: impl ToolExecutor) -> bool {
        let name = tool.name().to_string();
        self.register(name, Arc::new(tool))
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolExecutor>> {
        self.get(name)
            .ok_or_else(|| WaypointError::ToolNotFound(name.to_string()))
    }

    /// Bulk-register discovered tools. Returns how many were inserted.
    pub fn discover<I>(&self, providers: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn ToolExecutor>>,
    {
        providers
            .into_iter()
            .filter(|tool| self.register(tool.name().to_string(), Arc::clone(tool)))
            .count()
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let registry = Self::tools();
        registry.discover(crate::builtin::tools());
        registry
    }
}

impl Registry<dyn ModelExecutor> {
    pub fn models() -> Self {
        Self::new("model")
    }

    /// Register a model under its own name.
    pub fn register_model(&self, model: impl ModelExecutor) -> bool {
        let name = model.model().to_string();
        self.register(name, Arc::new(model))
    }

    /// Resolve a model by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ModelExecutor>> {
        self.get(name)
            .ok_or_else(|| WaypointError::ModelNotFound(name.to_string()))
    }

    /// Bulk-register discovered models. Returns how many were inserted.
    pub fn discover<I>(&self, providers: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn ModelExecutor>>,
    {
        providers
            .into_iter()
            .filter(|model| self.register(model.model().to_string(), Arc::clone(model)))
            .count()
    }

    /// Create a registry with all built-in models registered.
    pub fn with_builtins() -> Self {
        let registry = Self::models();
        registry.discover(crate::builtin::models());
        registry
    }
}

impl Default for Registry<dyn ToolExecutor> {
    fn default() -> Self {
        Self::tools()
    }
}

impl Default for Registry<dyn ModelExecutor> {
    fn default() -> Self {
        Self::models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::error::ErrorClass;
    use waypoint_core::types::{InvokeMode, SystemContext};
    use waypoint_test_utils::{MockModel, MockTool};

    #[tokio::test]
    async fn first_registration_wins() {
        let registry = ToolRegistry::tools();
        let first = MockTool::new("search").returning(json!({"v": "first"}));
        let second = MockTool::new("search").returning(json!({"v": "second"}));
        assert!(registry.register_tool(first));
        assert!(!registry.register_tool(second));
        assert_eq!(registry.len(), 1);

        let tool = registry.resolve("search").unwrap();
        let ctx = SystemContext::new(InvokeMode::Sync);
        let out = tool.run(serde_json::Map::new(), &ctx).await.unwrap();
        assert_eq!(out.get("v"), Some(&json!("first")));
    }

    #[test]
    fn resolve_unknown_is_system_error() {
        let registry = ToolRegistry::tools();
        let err = registry.resolve("nope").err().unwrap();
        assert!(matches!(err, WaypointError::ToolNotFound(_)));
        assert_eq!(err.class(), ErrorClass::System);

        let models = ModelRegistry::models();
        let err = models.resolve("nope").err().unwrap();
        assert!(matches!(err, WaypointError::ModelNotFound(_)));
    }

    #[test]
    fn discover_skips_collisions() {
        let registry = ToolRegistry::tools();
        registry.register_tool(MockTool::new("a"));
        let discovered: Vec<Arc<dyn ToolExecutor>> = vec![
            Arc::new(MockTool::new("a")),
            Arc::new(MockTool::new("b")),
            Arc::new(MockTool::new("c")),
        ];
        assert_eq!(registry.discover(discovered), 2);
        assert_eq!(registry.list(), vec!["a", "b", "c"]);
    }

    #[test]
    fn registries_are_independent() {
        let tools = ToolRegistry::tools();
        let models = ModelRegistry::models();
        tools.register_tool(MockTool::new("echo"));
        assert!(models.register_model(MockModel::new("echo", "hi")));
        assert!(tools.contains("echo"));
        assert!(models.contains("echo"));
    }

    #[test]
    fn builtins_registered() {
        let tools = ToolRegistry::with_builtins();
        assert!(tools.contains("echo"));
        assert!(tools.contains("counter"));
        let models = ModelRegistry::with_builtins();
        assert!(models.contains("echo"));
    }

    #[test]
    fn concurrent_registration_keeps_one() {
        let registry = Arc::new(ToolRegistry::tools());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register_tool(MockTool::new("shared")))
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }
}
