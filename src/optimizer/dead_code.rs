//! Dead-code elimination
//!
//! Every node that is not a transitive producer of a designated output is
//! removed. Placeholders for designated inputs stay, so the graph signature
//! never changes.

use log::debug;

use crate::error::ConvertResult;
use crate::graph::Graph;
use crate::pattern::live_nodes;

use super::{OptimizeResult, OptimizerPass};

/// Removes nodes that reach no designated output
#[derive(Debug, Default)]
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

impl OptimizerPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }

    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult> {
        let mut result = OptimizeResult::new();
        let live = live_nodes(graph);

        let dead: Vec<_> = graph
            .topological_order()?
            .into_iter()
            .rev()
            .filter(|id| !live.contains(id))
            .filter(|&id| {
                graph.node(id).is_some_and(|n| {
                    !(n.is_op("Placeholder") && n.outputs().iter().any(|o| graph.is_graph_input(o)))
                })
            })
            .collect();

        // consumers go first, so each removal sees no remaining readers
        for id in dead {
            let removed = graph.remove_node(id);
            result.record_removal(removed.name());
        }
        if result.changed() {
            debug!("removed {} dead node(s)", result.nodes_removed);
        }
        Ok(result)
    }
}
