use tracing::debug;

use waypoint_core::types::SystemContext;

use super::node::{FlowGraph, FlowNode, Route};

/// Select the successors of `node` given the run's context.
///
/// Conditions are evaluated in declared order and every branch whose
/// condition holds is taken, so several successors may come back. A node
/// with no true branch ends its path.
pub fn next_nodes<'g>(
    graph: &'g FlowGraph,
    node: &FlowNode,
    ctx: &SystemContext,
) -> Vec<&'g FlowNode> {
    let targets: Vec<&str> = match &node.route {
        Route::End => Vec::new(),
        Route::Next(target) => vec![target.as_str()],
        Route::Branches(branches) => branches
            .iter()
            .filter(|b| {
                let taken = b.condition.evaluate(&node.id, ctx);
                debug!(from = %node.id, to = %b.target, taken, "Evaluated branch");
                taken
            })
            .map(|b| b.target.as_str())
            .collect(),
    };

    targets
        .into_iter()
        .filter_map(|id| graph.node(id).ok())
        .collect()
}
