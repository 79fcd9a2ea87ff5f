//! Constants, placeholders and identity-like ops

use log::debug;

use crate::error::{ConvertError, ConvertResult};
use crate::graph::NodeId;

use super::registry::{register, HandlerRegistry};
use super::{retarget, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Const"] => { 1 => convert_const });
    register!(reg, ["Placeholder"] => { 1 => convert_placeholder });
    register!(reg, ["PlaceholderWithDefault"] => { 1 => convert_placeholder_with_default });
    register!(reg, ["Identity", "StopGradient", "Snapshot"] => { 1 => convert_identity });
    register!(reg, ["NoOp"] => { 1 => convert_noop });
}

/// Constants keep their value and become initializers at export
fn convert_const(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    ctx.node(id)?.get_tensor("value")?;
    retarget(ctx, id, "Const", &["value"])
}

/// Placeholders become designated graph inputs
fn convert_placeholder(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let output = ctx.graph.output_of(id, 0);
    ctx.graph.add_input(output);
    retarget(ctx, id, "Placeholder", &[])
}

/// Designated inputs turn into placeholders, everything else reads the default
fn convert_placeholder_with_default(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let output = ctx.graph.output_of(id, 0);
    if ctx.graph.is_graph_input(&output) {
        debug!("{} is a designated input, dropping its default", output);
        ctx.graph.set_node_inputs(id, Vec::new());
        retarget(ctx, id, "Placeholder", &[])
    } else {
        retarget(ctx, id, "Identity", &[])
    }
}

fn convert_identity(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    retarget(ctx, id, "Identity", &[])
}

/// Control-only nodes vanish
fn convert_noop(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.node(id)?;
    if node.outputs().iter().any(|o| ctx.graph.is_used(o)) {
        return Err(ConvertError::unsupported(node.name(), "NoOp output is read"));
    }
    ctx.graph.remove_node(id);
    Ok(())
}
