//! Removal of value-preserving nodes
//!
//! `Identity`, a `Cast` to the type the input already has, and a `Reshape`
//! to the shape the input already has are bypassed. A `Reshape` of a
//! single-use `Reshape` reads the inner input directly.

use log::debug;

use crate::error::ConvertResult;
use crate::graph::{Graph, NodeId};
use crate::pattern::{matcher, IDENTITY_LIKE};

use super::{OptimizeResult, OptimizerPass};

/// Removes nodes whose output equals their input
#[derive(Debug, Default)]
pub struct IdentityOptimizer;

impl IdentityOptimizer {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn is_noop_cast(graph: &Graph, id: NodeId) -> bool {
    let Some(node) = graph.node(id) else {
        return false;
    };
    let (Some(input), Ok(to)) = (node.input(0), node.get_type("to")) else {
        return false;
    };
    graph.get_dtype(input) == Some(to)
}

fn is_noop_reshape(graph: &Graph, id: NodeId) -> bool {
    let Some(node) = graph.node(id) else {
        return false;
    };
    let (Some(input), Some(shape)) = (node.input(0), node.input(1)) else {
        return false;
    };
    let input_shape = graph.get_shape(input);
    if !input_shape.is_fully_known() {
        return false;
    }
    let Some(target) = graph.const_value(shape).and_then(|v| v.as_i64s()) else {
        return false;
    };
    input_shape.dims() == Some(target.as_slice())
}

/// Bypass a node reading its data from input 0, pruning an orphaned shape operand
fn bypass(graph: &mut Graph, id: NodeId, result: &mut OptimizeResult) {
    let Some(node) = graph.node(id) else { return };
    let name = node.name().to_string();
    let op_type = node.op_type().to_string();
    let operand = node.input(1).map(str::to_string);
    if graph.bypass_node(id, 0) {
        debug!("removed {} {}", op_type, name);
        result.record_removal(&name);
        if let Some(operand) = operand {
            if let Some(removed) = graph.prune_producer(&operand) {
                result.record_removal(removed.name());
            }
        }
    }
}

fn collapse_reshapes(graph: &mut Graph, result: &mut OptimizeResult) {
    let pairs = matcher(graph).find_all_matches_with_condition(&["Reshape", "Reshape"], |g, nodes| {
        let inner_single_use = matcher(g).is_fusible_chain(nodes);
        // a 0 in the outer shape copies a dim from the inner result
        let outer_is_absolute = g
            .node(nodes[0])
            .and_then(|n| n.input(1))
            .and_then(|s| g.const_value(s))
            .and_then(|v| v.as_i64s())
            .is_some_and(|dims| !dims.contains(&0));
        inner_single_use && outer_is_absolute
    });

    for pair in pairs {
        let (outer, inner) = (pair.nodes[0], pair.nodes[1]);
        let Some(inner_node) = graph.node(inner) else { continue };
        if graph.node(outer).is_none() {
            continue;
        }
        let Some(src) = inner_node.input(0).map(str::to_string) else { continue };
        let inner_shape = inner_node.input(1).map(str::to_string);

        graph.set_node_input(outer, 0, src);
        let removed = graph.remove_node(inner);
        debug!("collapsed reshape {}", removed.name());
        result.record_removal(removed.name());
        if let Some(shape) = inner_shape {
            if let Some(pruned) = graph.prune_producer(&shape) {
                result.record_removal(pruned.name());
            }
        }
    }
}

impl OptimizerPass for IdentityOptimizer {
    fn name(&self) -> &'static str {
        "IdentityOptimizer"
    }

    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult> {
        let mut result = OptimizeResult::new();

        for id in graph.node_ids() {
            let Some(node) = graph.node(id) else { continue };
            let removable = match node.op_type() {
                op if IDENTITY_LIKE.contains(&op) => node.is_converted(),
                "Cast" => is_noop_cast(graph, id),
                "Reshape" => is_noop_reshape(graph, id),
                _ => false,
            };
            if removable {
                bypass(graph, id, &mut result);
            }
        }

        collapse_reshapes(graph, &mut result);
        Ok(result)
    }
}
