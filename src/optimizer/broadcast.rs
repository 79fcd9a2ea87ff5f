//! Broadcast simplification
//!
//! - `Expand` whose target shape adds nothing to a fully known input is
//!   removed.
//! - A constant operand of a broadcasting binary op loses its leading unit
//!   dims when the other operand has at least the same rank. The result
//!   keeps rank 1 at minimum, since some runtimes mis-broadcast scalars.
//!   Below opset 7 only an unaligned B operand may broadcast, so only that
//!   operand is touched.

use log::debug;

use crate::error::ConvertResult;
use crate::graph::{Graph, NodeId};
use crate::pattern::BROADCAST_OPS;
use crate::tensor::broadcast_dims;

use super::{OptimizeResult, OptimizerPass};

/// Removes broadcasting that has no effect
#[derive(Debug, Default)]
pub struct BroadcastOptimizer;

impl BroadcastOptimizer {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

/// Whether `Expand(input, shape)` reproduces its input
fn is_noop_expand(graph: &Graph, id: NodeId) -> bool {
    let Some(node) = graph.node(id) else {
        return false;
    };
    let (Some(input), Some(shape)) = (node.input(0), node.input(1)) else {
        return false;
    };
    let input_shape = graph.get_shape(input);
    let Some(dims) = input_shape.dims().filter(|_| input_shape.is_fully_known()) else {
        return false;
    };
    let Some(target) = graph.const_value(shape).and_then(|v| v.as_i64s()) else {
        return false;
    };
    broadcast_dims(dims, &target).is_some_and(|out| out == dims)
}

/// Leading unit dims to strip from a constant operand, if any
fn strippable_dims(dims: &[i64], other_rank: usize) -> Option<Vec<i64>> {
    if dims.len() < 2 || other_rank < dims.len() {
        return None;
    }
    let leading = dims.iter().take(dims.len() - 1).take_while(|&&d| d == 1).count();
    (leading > 0).then(|| dims[leading..].to_vec())
}

fn strip_operand(graph: &mut Graph, id: NodeId, idx: usize) -> ConvertResult<bool> {
    let Some(node) = graph.node(id) else {
        return Ok(false);
    };
    if graph.opset() < 7 && (idx != 1 || node.has_attr("axis")) {
        return Ok(false);
    }
    let (Some(operand), Some(other)) = (node.input(idx), node.input(1 - idx)) else {
        return Ok(false);
    };
    let Some(value) = graph.const_value(operand) else {
        return Ok(false);
    };
    let Some(other_rank) = graph.get_rank(other) else {
        return Ok(false);
    };
    let Some(dims) = strippable_dims(value.dims(), other_rank) else {
        return Ok(false);
    };

    let value = value.reshaped(dims)?;
    let operand = operand.to_string();
    let stripped = graph.make_const_tensor(&format!("{}_squeezed", operand), value)?;
    graph.set_node_input(id, idx, stripped);
    graph.prune_producer(&operand);
    Ok(true)
}

impl OptimizerPass for BroadcastOptimizer {
    fn name(&self) -> &'static str {
        "BroadcastOptimizer"
    }

    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult> {
        let mut result = OptimizeResult::new();

        for id in graph.find_nodes_by_op("Expand") {
            if !is_noop_expand(graph, id) {
                continue;
            }
            let name = graph.node(id).map(|n| n.name().to_string()).unwrap_or_default();
            let shape_input = graph.node(id).and_then(|n| n.input(1)).map(str::to_string);
            if graph.bypass_node(id, 0) {
                debug!("removed no-op expand {}", name);
                result.record_removal(&name);
                if let Some(shape) = shape_input {
                    graph.prune_producer(&shape);
                }
            }
        }

        for id in graph.node_ids() {
            let is_binary = graph
                .node(id)
                .is_some_and(|n| n.is_converted() && BROADCAST_OPS.contains(&n.op_type()) && n.inputs().len() == 2);
            if !is_binary {
                continue;
            }
            for idx in 0..2 {
                if strip_operand(graph, id, idx)? {
                    let name = graph.node(id).map(|n| n.name().to_string()).unwrap_or_default();
                    result.record(&name);
                }
            }
        }

        Ok(result)
    }
}
