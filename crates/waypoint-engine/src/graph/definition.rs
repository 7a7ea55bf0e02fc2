use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};

use super::condition::Condition;
use super::node::{Activity, Branch, FlowGraph, FlowNode, Route};

/// A flow as written in TOML.
///
/// ```toml
/// root = "fetch"
///
/// [[nodes]]
/// id = "fetch"
/// delegation = "tool"
/// next = "summarize"
/// [nodes.properties]
/// tool = "echo"
/// parameters = [{ name = "url", value = "https://example.com" }]
///
/// [[nodes]]
/// id = "summarize"
/// delegation = "model"
/// [nodes.properties]
/// model = "echo"
/// prompt = "summarize the page"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    pub root: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub delegation: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Partial steps run before the node's own step.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub branches: Vec<BranchDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDefinition {
    pub delegation: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchDefinition {
    pub when: String,
    pub to: String,
}

impl FlowDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WaypointError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| WaypointError::Config(format!("invalid flow: {}", e)))
    }

    /// Validate and build the executable graph.
    pub fn into_graph(self) -> Result<FlowGraph> {
        let nodes = self
            .nodes
            .into_iter()
            .map(NodeDefinition::into_node)
            .collect::<Result<Vec<_>>>()?;
        FlowGraph::new(self.root, nodes)
    }
}

impl NodeDefinition {
    fn into_node(self) -> Result<FlowNode> {
        let route = match (self.next, self.branches.is_empty()) {
            (Some(_), false) => {
                return Err(WaypointError::Config(format!(
                    "node {} sets both next and branches",
                    self.id
                )))
            }
            (Some(next), true) => Route::Next(next),
            (None, true) => Route::End,
            (None, false) => Route::Branches(
                self.branches
                    .into_iter()
                    .map(|b| Branch::new(Condition::parse(&b.when), b.to))
                    .collect(),
            ),
        };

        Ok(FlowNode {
            id: self.id,
            partials: self
                .steps
                .into_iter()
                .map(|s| Activity::new(s.delegation, s.properties))
                .collect(),
            activity: Activity::new(self.delegation, self.properties),
            route,
        })
    }
}
