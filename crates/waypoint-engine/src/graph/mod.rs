//! Flow graph: nodes, conditional branches, and the runner that walks them.
//!
//! A flow is a directed graph of nodes, each wrapping one terminal
//! activity and optionally some partial steps. After a node completes,
//! every branch whose condition holds is followed. Cycles are allowed,
//! so reflection loops are expressed as a branch back to an earlier node
//! guarded by a condition on its output.

pub mod branch;
pub mod condition;
pub mod definition;
pub mod node;
pub mod runner;

pub use branch::next_nodes;
pub use condition::{evaluate_expression, Condition};
pub use definition::FlowDefinition;
pub use node::{Activity, Branch, FlowGraph, FlowNode, Route};
pub use runner::{FlowRunner, NodeVisit, RunOutcome};
