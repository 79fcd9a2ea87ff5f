//! Reduction handlers
//!
//! Source reductions take their axes as a second input and a `keep_dims`
//! flag. Target reductions take `axes` as an attribute until 13 for
//! `ReduceSum` and until 18 for the others, as an input afterwards.

use crate::error::ConvertResult;
use crate::graph::NodeId;

use super::registry::{register, HandlerRegistry};
use super::{const_input_ints, int64_const, retarget, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Mean", "Sum", "Max", "Min", "Prod"] => {
        1 => reduce_v1,
        13 => reduce_v13,
        18 => reduce_v18,
    });
}

fn target_op(op_type: &str) -> String {
    format!("Reduce{}", op_type)
}

fn reduce(ctx: &mut HandlerContext<'_>, id: NodeId, axes_as_input: bool) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let keepdims = node.get_bool_or("keep_dims", false)?;
    let axes = match node.input(1) {
        Some(t) if !t.is_empty() => const_input_ints(ctx.graph, &node, 1)?,
        _ => Vec::new(),
    };
    let x = node.input(0).unwrap_or_default().to_string();

    retarget(ctx, id, &target_op(node.op_type()), &[])?;
    ctx.node_mut(id)?.set_attr("keepdims", keepdims as i64);

    if axes.is_empty() {
        // no axes reduces everything in both forms
        ctx.graph.set_node_inputs(id, vec![x]);
    } else if axes_as_input {
        let axes = int64_const(ctx.graph, &format!("{}/axes", node.name()), axes)?;
        ctx.graph.set_node_inputs(id, vec![x, axes]);
    } else {
        ctx.graph.set_node_inputs(id, vec![x]);
        ctx.node_mut(id)?.set_attr("axes", axes);
    }
    Ok(())
}

fn reduce_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    reduce(ctx, id, false)
}

fn reduce_v13(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let is_sum = ctx.node(id)?.is_op("Sum");
    reduce(ctx, id, is_sum)
}

fn reduce_v18(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    reduce(ctx, id, true)
}
