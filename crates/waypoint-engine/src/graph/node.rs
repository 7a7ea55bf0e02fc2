use std::collections::HashMap;

use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};

use super::condition::Condition;

/// One unit of delegated work: a delegation kind plus its raw properties.
#[derive(Debug, Clone)]
pub struct Activity {
    pub kind: String,
    pub properties: Map<String, Value>,
}

impl Activity {
    pub fn new(kind: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            properties,
        }
    }

    /// A tool activity with `{name, value}` parameters.
    pub fn tool(tool: &str, parameters: Value) -> Self {
        let mut properties = Map::new();
        properties.insert("tool".into(), Value::String(tool.to_string()));
        properties.insert("parameters".into(), parameters);
        Self::new("tool", properties)
    }

    /// A model activity with a single user prompt.
    pub fn model(model: &str, prompt: &str) -> Self {
        let mut properties = Map::new();
        properties.insert("model".into(), Value::String(model.to_string()));
        properties.insert("prompt".into(), Value::String(prompt.to_string()));
        Self::new("model", properties)
    }
}

/// A conditional outgoing branch.
#[derive(Debug, Clone)]
pub struct Branch {
    pub condition: Condition,
    pub target: String,
}

impl Branch {
    pub fn new(condition: Condition, target: impl Into<String>) -> Self {
        Self {
            condition,
            target: target.into(),
        }
    }
}

/// Where the flow goes after a node.
#[derive(Debug, Clone, Default)]
pub enum Route {
    #[default]
    End,
    /// Unconditional successor.
    Next(String),
    /// Every branch whose condition holds is taken, in declared order.
    Branches(Vec<Branch>),
}

/// A node in the flow graph.
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub id: String,
    /// Partial steps attached before the terminal step, in order.
    pub partials: Vec<Activity>,
    /// The terminal step whose result is recorded for this node.
    pub activity: Activity,
    pub route: Route,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, activity: Activity) -> Self {
        Self {
            id: id.into(),
            partials: Vec::new(),
            activity,
            route: Route::End,
        }
    }

    pub fn with_partial(mut self, activity: Activity) -> Self {
        self.partials.push(activity);
        self
    }

    pub fn then(mut self, target: impl Into<String>) -> Self {
        self.route = Route::Next(target.into());
        self
    }

    /// Add a conditional branch. Replaces an unconditional `then`.
    pub fn branch(mut self, condition: Condition, target: impl Into<String>) -> Self {
        let branch = Branch::new(condition, target);
        match &mut self.route {
            Route::Branches(branches) => branches.push(branch),
            route => *route = Route::Branches(vec![branch]),
        }
        self
    }

    fn targets(&self) -> Vec<&str> {
        match &self.route {
            Route::End => Vec::new(),
            Route::Next(target) => vec![target.as_str()],
            Route::Branches(branches) => branches.iter().map(|b| b.target.as_str()).collect(),
        }
    }

    /// Every delegation kind this node uses.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.partials
            .iter()
            .chain(std::iter::once(&self.activity))
            .map(|a| a.kind.as_str())
    }
}

/// A validated flow graph. Cycles are allowed.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: HashMap<String, FlowNode>,
    root: String,
}

impl FlowGraph {
    /// Build a graph, checking the root and every branch target exist.
    pub fn new(root: impl Into<String>, nodes: Vec<FlowNode>) -> Result<Self> {
        let root = root.into();
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let id = node.id.clone();
            if map.insert(id.clone(), node).is_some() {
                return Err(WaypointError::Config(format!("duplicate node id: {}", id)));
            }
        }

        if !map.contains_key(&root) {
            return Err(WaypointError::NodeNotFound(root));
        }
        for node in map.values() {
            for target in node.targets() {
                if !map.contains_key(target) {
                    return Err(WaypointError::NodeNotFound(format!(
                        "{} (referenced by {})",
                        target, node.id
                    )));
                }
            }
        }

        Ok(Self { nodes: map, root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn node(&self, id: &str) -> Result<&FlowNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| WaypointError::NodeNotFound(id.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Activity {
        Activity::tool("echo", json!([]))
    }

    #[test]
    fn test_cycles_are_accepted() {
        let graph = FlowGraph::new(
            "a",
            vec![
                FlowNode::new("a", echo()).then("b"),
                FlowNode::new("b", echo()).branch(Condition::Always, "a"),
            ],
        )
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.root(), "a");
    }

    #[test]
    fn test_missing_target() {
        let err = FlowGraph::new("a", vec![FlowNode::new("a", echo()).then("ghost")]).unwrap_err();
        assert!(matches!(err, WaypointError::NodeNotFound(msg) if msg.starts_with("ghost")));
    }

    #[test]
    fn test_missing_root() {
        let err = FlowGraph::new("start", vec![FlowNode::new("a", echo())]).unwrap_err();
        assert!(matches!(err, WaypointError::NodeNotFound(_)));
    }

    #[test]
    fn test_duplicate_node() {
        let err = FlowGraph::new(
            "a",
            vec![FlowNode::new("a", echo()), FlowNode::new("a", echo())],
        )
        .unwrap_err();
        assert!(matches!(err, WaypointError::Config(_)));
    }

    #[test]
    fn test_branch_replaces_next() {
        let node = FlowNode::new("a", echo())
            .then("b")
            .branch(Condition::OnSuccess, "c")
            .branch(Condition::OnFailure, "d");
        assert_eq!(node.targets(), vec!["c", "d"]);
    }

    #[test]
    fn test_kinds() {
        let node = FlowNode::new("a", Activity::model("echo", "hi")).with_partial(echo());
        assert_eq!(node.kinds().collect::<Vec<_>>(), vec!["tool", "model"]);
    }
}
