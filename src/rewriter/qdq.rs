//! Quantize-dequantize cleanup
//!
//! Runs after dispatch on target-form nodes:
//!
//! - `DequantizeLinear → QuantizeLinear` with identical constant parameters
//!   is a round trip; readers take the original quantized tensor.
//! - With `dequantize` set, `QuantizeLinear → DequantizeLinear` pairs are
//!   dropped (readers take the float input) and `DequantizeLinear` of a
//!   constant folds to a float constant.

use log::debug;

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, NewNode, Node, NodeId};
use crate::tensor::{normalize_axis, TensorData, TensorValue};

use super::{RewriteContext, Rewriter};

/// Cancels redundant quantization round trips
#[derive(Debug, Default)]
pub struct QdqRewriter;

impl QdqRewriter {
    /// Create the rewriter
    pub fn new() -> Self {
        Self
    }
}

/// Constant parameter of a quantize node; an omitted zero point is `None`
fn param<'g>(graph: &'g Graph, node: &Node, idx: usize) -> Option<Option<&'g TensorValue>> {
    match node.input(idx) {
        None | Some("") => Some(None),
        Some(t) => graph.const_value(t).map(Some),
    }
}

/// Whether two quantize nodes use the same constant scale, zero point and axis
fn same_params(graph: &Graph, a: &Node, b: &Node) -> bool {
    let axis = |n: &Node| n.get_int_or("axis", 1).ok();
    let (Some(scale_a), Some(scale_b)) = (param(graph, a, 1), param(graph, b, 1)) else {
        return false;
    };
    let (Some(zp_a), Some(zp_b)) = (param(graph, a, 2), param(graph, b, 2)) else {
        return false;
    };
    scale_a.is_some() && scale_a == scale_b && zp_a == zp_b && axis(a) == axis(b)
}

/// Route readers of `from` to `to` and drop `node` plus a now-unused producer
///
/// Returns false when `from` is a designated output and cannot be rerouted.
fn short_circuit(graph: &mut Graph, node: NodeId, upstream: NodeId, from: &str, to: &str) -> bool {
    if graph.is_graph_output(from) {
        return false;
    }
    graph.replace_all_inputs(from, to);
    graph.remove_node(node);
    graph.remove_if_unused(upstream);
    true
}

fn cancel_round_trips(graph: &mut Graph) -> usize {
    let mut count = 0;
    for q in graph.find_nodes_by_op("QuantizeLinear") {
        let Some(q_node) = graph.node(q).cloned() else { continue };
        let input = q_node.input(0).unwrap_or_default();
        let Some(dq) = graph.producer(input) else { continue };
        let Some(dq_node) = graph.node(dq).cloned() else { continue };
        if !dq_node.is_op("DequantizeLinear") || !same_params(graph, &dq_node, &q_node) {
            continue;
        }
        let quantized = dq_node.input(0).unwrap_or_default();
        let out = q_node.output(0).unwrap_or_default();
        if short_circuit(graph, q, dq, out, quantized) {
            debug!("cancelled quantize round trip {} -> {}", dq_node.name(), q_node.name());
            count += 1;
        }
    }
    count
}

fn strip_pairs(graph: &mut Graph) -> usize {
    let mut count = 0;
    for dq in graph.find_nodes_by_op("DequantizeLinear") {
        let Some(dq_node) = graph.node(dq).cloned() else { continue };
        let input = dq_node.input(0).unwrap_or_default();
        let Some(q) = graph.producer(input) else { continue };
        let Some(q_node) = graph.node(q).cloned() else { continue };
        if !q_node.is_op("QuantizeLinear") {
            continue;
        }
        let float = q_node.input(0).unwrap_or_default();
        let out = dq_node.output(0).unwrap_or_default();
        if short_circuit(graph, dq, q, out, float) {
            debug!("stripped quantization {} -> {}", q_node.name(), dq_node.name());
            count += 1;
        }
    }
    count
}

/// `(x - zero_point) * scale`, per tensor or along `axis`
fn dequantize_value(node: &Node, x: &TensorValue, scale: &TensorValue, zp: Option<&TensorValue>) -> ConvertResult<TensorValue> {
    let bad = |reason: &str| ConvertError::precondition(node.name(), reason.to_string());
    let xs = x.as_i64s().ok_or_else(|| bad("quantized constant must hold integers"))?;
    let scales = scale.as_f32s().ok_or_else(|| bad("scale must be numeric"))?;
    let zps = match zp {
        Some(zp) => zp.as_i64s().ok_or_else(|| bad("zero point must hold integers"))?,
        None => vec![0; scales.len()],
    };
    if scales.len() != zps.len() || scales.is_empty() {
        return Err(bad("scale and zero point sizes differ"));
    }

    let dims = x.dims();
    let (channels, stride) = if scales.len() == 1 {
        (1, 1)
    } else {
        let axis = normalize_axis(node.get_int_or("axis", 1)?, dims.len())?;
        if dims[axis] as usize != scales.len() {
            return Err(bad("per-axis scale does not match the quantized axis"));
        }
        (scales.len(), dims[axis + 1..].iter().product::<i64>() as usize)
    };

    let values: Vec<f32> = xs
        .iter()
        .enumerate()
        .map(|(i, &q)| {
            let c = (i / stride) % channels;
            (q - zps[c]) as f32 * scales[c]
        })
        .collect();
    TensorValue::new(dims.to_vec(), TensorData::Float(values))
}

fn fold_constants(graph: &mut Graph) -> ConvertResult<usize> {
    let mut count = 0;
    for dq in graph.find_nodes_by_op("DequantizeLinear") {
        let Some(node) = graph.node(dq).cloned() else { continue };
        let x = node.input(0).unwrap_or_default();
        let (Some(x_value), Some(Some(scale))) = (graph.const_value(x), param(graph, &node, 1)) else {
            continue;
        };
        let Some(zp) = param(graph, &node, 2) else { continue };
        let value = dequantize_value(&node, x_value, scale, zp)?;

        graph.replace_node(dq, NewNode::new("Const").attr("value", value))?;
        for tensor in node.inputs() {
            graph.prune_producer(tensor);
        }
        debug!("folded constant dequantize {}", node.name());
        count += 1;
    }
    Ok(count)
}

impl Rewriter for QdqRewriter {
    fn name(&self) -> &'static str {
        "QdqRewriter"
    }

    fn rewrite(&self, ctx: &mut RewriteContext<'_>) -> ConvertResult<bool> {
        let mut changed = cancel_round_trips(ctx.graph);
        if ctx.dequantize {
            changed += strip_pairs(ctx.graph);
            changed += fold_constants(ctx.graph)?;
        }
        Ok(changed > 0)
    }
}
