//! Quantize / dequantize handlers
//!
//! Source nodes read `(x, scale, zero_point)` and may carry an `axis` for
//! per-channel parameters. Per-axis quantization needs opset 13.

use crate::error::{ConvertError, ConvertResult};
use crate::graph::NodeId;

use super::registry::{register, HandlerRegistry};
use super::{retarget, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Quantize", "Dequantize"] => { 10 => quantize_v10, 13 => quantize_v13 });
}

fn target_op(op_type: &str) -> &'static str {
    if op_type == "Quantize" {
        "QuantizeLinear"
    } else {
        "DequantizeLinear"
    }
}

/// Whether the scale holds more than one value
fn is_per_axis(ctx: &HandlerContext<'_>, id: NodeId) -> ConvertResult<bool> {
    let node = ctx.node(id)?;
    let scale = node.input(1).unwrap_or_default();
    if let Some(value) = ctx.graph.const_value(scale) {
        return Ok(value.num_elements() > 1);
    }
    Ok(match ctx.graph.get_shape(scale).num_elements() {
        Some(n) => n > 1,
        None => node.has_attr("axis"),
    })
}

fn quantize_v10(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    if is_per_axis(ctx, id)? {
        let node = ctx.node(id)?;
        return Err(ConvertError::unsupported(
            node.name(),
            format!("per-axis {} needs opset 13, requested {}", node.op_type(), ctx.opset),
        ));
    }
    let op = target_op(ctx.node(id)?.op_type());
    retarget(ctx, id, op, &[])
}

fn quantize_v13(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let keep: &[&str] = if is_per_axis(ctx, id)? { &["axis"] } else { &[] };
    let op = target_op(ctx.node(id)?.op_type());
    retarget(ctx, id, op, keep)
}
