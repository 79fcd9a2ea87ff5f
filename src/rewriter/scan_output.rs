//! Tensor-list loop variables to scan outputs
//!
//! A source loop accumulating per-iteration values carries a tensor list:
//!
//! ```text
//! list_0 = TensorListReserve(...)
//! while cond(..., list):
//!     list = TensorListSetItem(list, i, value)
//! result = TensorListStack(list)
//! ```
//!
//! The target `Loop` expresses this as a scan output: the body yields
//! `value` every iteration and the loop stacks the values itself. The
//! carried slot disappears, `value` is appended after the carried outputs,
//! and readers of the stacked result read the loop output directly.

use log::debug;

use crate::error::ConvertResult;
use crate::graph::{AttrMap, Graph, NewNode, Node, NodeId};

use super::{RewriteContext, Rewriter};

/// Rewrites tensor-list loop variables of `While` nodes into scan outputs
#[derive(Debug, Default)]
pub struct ScanOutputRewriter;

impl ScanOutputRewriter {
    /// Create the rewriter
    pub fn new() -> Self {
        Self
    }
}

/// One loop variable eligible for the rewrite
struct ScanSlot {
    /// Carried slot index
    index: usize,
    /// Body tensor appended each iteration
    value: String,
    /// `TensorListSetItem` node in the body
    set_item: NodeId,
}

/// Check the body side: `TensorListSetItem(input_i, index, value)` yields output `i`
fn body_slot(body: &Graph, index: usize) -> Option<ScanSlot> {
    let list_in = body.inputs().get(index)?;
    let list_out = body.outputs().get(index)?;
    let set_item = body.producer(list_out)?;
    let node = body.node(set_item)?;
    if !node.is_op("TensorListSetItem") || node.input(0) != Some(list_in.as_str()) {
        return None;
    }
    // the list is written once and never read inside the body
    if body.consumer_count(list_in) != 1 || body.is_graph_output(list_in) {
        return None;
    }
    if body.consumer_count(list_out) != 0 || body.outputs().iter().filter(|o| *o == list_out).count() != 1 {
        return None;
    }
    Some(ScanSlot {
        index,
        value: node.input(2)?.to_string(),
        set_item,
    })
}

/// Check the outer side: the loop result is only read by `TensorListStack`
fn outer_slot_ok(graph: &Graph, node: &Node, index: usize) -> bool {
    let Some(result) = node.output(index) else {
        return false;
    };
    if graph.is_graph_output(result) {
        return false;
    }
    let readers = graph.find_output_consumers(result);
    if readers.is_empty() || graph.consumer_count(result) != readers.len() {
        return false;
    }
    let all_stacks = readers
        .iter()
        .all(|r| graph.node(*r).is_some_and(|n| n.is_op("TensorListStack")));
    // a stacked graph output can only be taken over by a single reader
    let stacked_outputs = readers
        .iter()
        .map(|r| graph.output_of(*r, 0))
        .filter(|o| graph.is_graph_output(o))
        .count();
    all_stacks && (stacked_outputs == 0 || readers.len() == 1)
}

fn rewrite_loop(graph: &mut Graph, id: NodeId) -> ConvertResult<bool> {
    let Some(node) = graph.node(id).cloned() else {
        return Ok(false);
    };
    let carried = node.inputs().len();
    let num_scans = node.get_int_or("num_scan_outputs", 0)? as usize;
    let (Ok(body), Ok(cond)) = (node.get_graph("body"), node.get_graph("cond")) else {
        return Ok(false);
    };

    let slots: Vec<ScanSlot> = (0..carried)
        .filter_map(|i| body_slot(body, i))
        .filter(|s| outer_slot_ok(graph, &node, s.index))
        .filter(|s| cond.inputs().get(s.index).is_some_and(|t| !cond.is_used(t)))
        .collect();
    if slots.is_empty() {
        return Ok(false);
    }
    let mut body = body.clone();
    let mut cond = cond.clone();
    let is_slot = |i: usize| slots.iter().any(|s| s.index == i);

    // body: drop the list slots, append the per-iteration values
    let old_outputs = body.outputs().to_vec();
    let mut outputs: Vec<String> = (0..carried)
        .filter(|i| !is_slot(*i))
        .map(|i| old_outputs[i].clone())
        .collect();
    outputs.extend(old_outputs[carried..].iter().cloned());
    outputs.extend(slots.iter().map(|s| s.value.clone()));
    body.set_outputs(outputs);
    for slot in &slots {
        body.remove_node(slot.set_item);
    }
    let keep_inputs = |inputs: &[String]| -> Vec<String> {
        inputs
            .iter()
            .enumerate()
            .filter(|(i, _)| !is_slot(*i))
            .map(|(_, t)| t.clone())
            .collect()
    };
    body.set_inputs(keep_inputs(body.inputs()));
    cond.set_inputs(keep_inputs(cond.inputs()));

    // outer node: same output ids, list results moved behind existing scans
    let old_outs = node.outputs().to_vec();
    let mut new_outs: Vec<String> = (0..carried)
        .filter(|i| !is_slot(*i))
        .map(|i| old_outs[i].clone())
        .collect();
    new_outs.extend(old_outs[carried..carried + num_scans].iter().cloned());
    new_outs.extend(slots.iter().map(|s| old_outs[s.index].clone()));
    let dropped_inits: Vec<String> = slots.iter().map(|s| node.inputs()[s.index].clone()).collect();

    let mut attrs: AttrMap = node.attrs().map(|(k, v)| (k.clone(), v.clone())).collect();
    attrs.insert("num_scan_outputs".into(), ((num_scans + slots.len()) as i64).into());
    attrs.insert("body".into(), body.into());
    attrs.insert("cond".into(), cond.into());
    let mut replacement = NewNode::new(node.op_type())
        .domain(node.domain())
        .inputs(keep_inputs(node.inputs()))
        .outputs(new_outs)
        .attrs(attrs);
    if !node.is_converted() {
        replacement = replacement.source();
    }
    graph.replace_node(id, replacement)?;

    // readers of the stacked list read the scan output
    for slot in &slots {
        let result = &old_outs[slot.index];
        for stack in graph.find_output_consumers(result) {
            let stacked = graph.output_of(stack, 0);
            graph.copy_tensor_info(&stacked, result);
            graph.bypass_node(stack, 0);
        }
    }
    for init in &dropped_inits {
        graph.prune_producer(init);
    }

    debug!(
        "loop {}: {} tensor-list variable(s) became scan outputs",
        node.name(),
        slots.len()
    );
    Ok(true)
}

impl Rewriter for ScanOutputRewriter {
    fn name(&self) -> &'static str {
        "ScanOutputRewriter"
    }

    fn rewrite(&self, ctx: &mut RewriteContext<'_>) -> ConvertResult<bool> {
        let mut changed = false;
        for id in ctx.graph.find_nodes_by_op("While") {
            changed |= rewrite_loop(ctx.graph, id)?;
        }
        Ok(changed)
    }
}
