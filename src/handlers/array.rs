//! Layout, shape and type manipulation handlers

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{NewNode, NodeId};
use crate::proto::tensor_proto::DataType;
use crate::tensor::normalize_axis;

use super::registry::{register, HandlerRegistry};
use super::{const_input_ints, insert_cast, int64_const, retarget, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Reshape"] => { 5 => reshape });
    register!(reg, ["Transpose"] => { 1 => transpose });
    register!(reg, ["ConcatV2"] => { 1 => concat_v2 });
    register!(reg, ["Squeeze"] => { 1 => squeeze_v1, 13 => squeeze_v13 });
    register!(reg, ["ExpandDims"] => { 1 => expand_dims_v1, 13 => expand_dims_v13 });
    register!(reg, ["Cast"] => { 6 => cast });
    register!(reg, ["Shape"] => { 1 => shape });
    register!(reg, ["Fill"] => { 8 => fill });
    register!(reg, ["GatherV2"] => { 1 => gather_v2 });
}

/// Make input `idx` an int64 tensor, folding constants directly
fn ensure_int64_input(ctx: &mut HandlerContext<'_>, id: NodeId, idx: usize) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let tensor = node.input(idx).unwrap_or_default();
    if ctx.graph.get_dtype(tensor) == Some(DataType::Int64) {
        return Ok(());
    }
    let replacement = match ctx.graph.const_value(tensor).cloned() {
        Some(value) => {
            let name = ctx.graph.unique_name(&format!("{}/i64", node.name()));
            ctx.graph.make_const_tensor(&name, value.cast(DataType::Int64)?)?
        }
        None => insert_cast(ctx.graph, tensor, DataType::Int64, node.name())?,
    };
    ctx.graph.set_node_input(id, idx, replacement);
    Ok(())
}

/// `Reshape` with an int64 shape input
fn reshape(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    ensure_int64_input(ctx, id, 1)?;
    retarget(ctx, id, "Reshape", &[])
}

/// Constant permutation input moves into the `perm` attribute
fn transpose(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let x = node.input(0).unwrap_or_default().to_string();
    let perm = match node.input(1) {
        Some(t) if !t.is_empty() => Some(const_input_ints(ctx.graph, &node, 1)?),
        _ => None,
    };
    ctx.graph.set_node_inputs(id, vec![x]);
    retarget(ctx, id, "Transpose", &[])?;
    if let Some(perm) = perm {
        ctx.node_mut(id)?.set_attr("perm", perm);
    }
    Ok(())
}

/// Trailing axis input moves into the `axis` attribute
fn concat_v2(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let n = node.inputs().len();
    if n < 2 {
        return Err(ConvertError::InvalidNode(format!("{} needs an axis input", node.name())));
    }
    let axis = match const_input_ints(ctx.graph, &node, n - 1)?.as_slice() {
        [axis] => *axis,
        other => {
            return Err(ConvertError::unsupported(node.name(), format!("axis must be a scalar, got {:?}", other)))
        }
    };
    // negative axes are only accepted from 11
    let axis = if axis < 0 && ctx.opset < 11 {
        let rank = ctx
            .graph
            .get_rank(node.input(0).unwrap_or_default())
            .ok_or_else(|| ConvertError::unsupported(node.name(), "negative axis needs a known rank"))?;
        normalize_axis(axis, rank)? as i64
    } else {
        axis
    };

    ctx.graph.set_node_inputs(id, node.inputs()[..n - 1].to_vec());
    retarget(ctx, id, "Concat", &[])?;
    ctx.node_mut(id)?.set_attr("axis", axis);
    Ok(())
}

/// Source squeeze axes; an empty list removes every unit dim
fn squeeze_axes(ctx: &HandlerContext<'_>, id: NodeId) -> ConvertResult<Vec<i64>> {
    let node = ctx.node(id)?;
    node.get_ints_or("squeeze_dims", Vec::new())
        .and_then(|dims| if dims.is_empty() { node.get_ints_or("axis", dims) } else { Ok(dims) })
}

fn squeeze_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let axes = squeeze_axes(ctx, id)?;
    retarget(ctx, id, "Squeeze", &[])?;
    if !axes.is_empty() {
        ctx.node_mut(id)?.set_attr("axes", axes);
    }
    Ok(())
}

fn squeeze_v13(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let axes = squeeze_axes(ctx, id)?;
    retarget(ctx, id, "Squeeze", &[])?;
    if !axes.is_empty() {
        let name = ctx.node(id)?.name().to_string();
        let axes = int64_const(ctx.graph, &format!("{}/axes", name), axes)?;
        let x = ctx.node(id)?.input(0).unwrap_or_default().to_string();
        ctx.graph.set_node_inputs(id, vec![x, axes]);
    }
    Ok(())
}

/// Single axis of `ExpandDims`, normalized when negative axes are not allowed
fn expand_dims_axis(ctx: &HandlerContext<'_>, id: NodeId) -> ConvertResult<i64> {
    let node = ctx.node(id)?;
    let axis = match const_input_ints(ctx.graph, node, 1)?.as_slice() {
        [axis] => *axis,
        other => {
            return Err(ConvertError::unsupported(node.name(), format!("axis must be a scalar, got {:?}", other)))
        }
    };
    if axis >= 0 || ctx.opset >= 11 {
        return Ok(axis);
    }
    let rank = ctx
        .graph
        .get_rank(node.input(0).unwrap_or_default())
        .ok_or_else(|| ConvertError::unsupported(node.name(), "negative axis needs a known rank"))?;
    Ok(normalize_axis(axis, rank + 1)? as i64)
}

fn expand_dims_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let axis = expand_dims_axis(ctx, id)?;
    let x = ctx.node(id)?.input(0).unwrap_or_default().to_string();
    ctx.graph.set_node_inputs(id, vec![x]);
    retarget(ctx, id, "Unsqueeze", &[])?;
    ctx.node_mut(id)?.set_attr("axes", vec![axis]);
    Ok(())
}

fn expand_dims_v13(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let axis = expand_dims_axis(ctx, id)?;
    let node = ctx.snapshot(id)?;
    let axes = int64_const(ctx.graph, &format!("{}/axes", node.name()), vec![axis])?;
    let x = node.input(0).unwrap_or_default().to_string();
    ctx.graph.set_node_inputs(id, vec![x, axes]);
    retarget(ctx, id, "Unsqueeze", &[])
}

fn cast(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let to = ctx.node(id)?.get_type("DstT")?;
    retarget(ctx, id, "Cast", &[])?;
    ctx.node_mut(id)?.set_attr("to", to);
    Ok(())
}

/// `Shape` always yields int64; an int32 request adds a `Cast`
fn shape(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let out_type = node.get_type_or("out_type", DataType::Int32)?;
    if out_type == DataType::Int64 {
        return retarget(ctx, id, "Shape", &[]);
    }

    let name = ctx.graph.unique_name(&format!("{}/shape", node.name()));
    let inner = ctx.graph.add_node(
        NewNode::new("Shape")
            .name(name)
            .input(node.input(0).unwrap_or_default())
            .dtypes(vec![DataType::Int64]),
    )?;
    let inner_out = ctx.graph.output_of(inner, 0);
    ctx.graph.set_node_inputs(id, vec![inner_out]);
    retarget(ctx, id, "Cast", &[])?;
    ctx.node_mut(id)?.set_attr("to", out_type);
    Ok(())
}

/// `Fill(dims, value)` as `Expand(value, dims)`
fn fill(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let (dims, value) = match node.inputs() {
        [dims, value] => (dims.clone(), value.clone()),
        _ => return Err(ConvertError::InvalidNode(format!("{} expects 2 inputs", node.name()))),
    };
    ctx.graph.set_node_inputs(id, vec![value, dims]);
    ensure_int64_input(ctx, id, 1)?;
    retarget(ctx, id, "Expand", &[])
}

/// `GatherV2(params, indices, axis)` as `Gather` with a constant axis
fn gather_v2(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    if node.inputs().len() != 3 {
        return Err(ConvertError::InvalidNode(format!("{} expects 3 inputs", node.name())));
    }
    if node.get_int_or("batch_dims", 0)? != 0 {
        return Err(ConvertError::unsupported(node.name(), "batch_dims is not supported"));
    }
    let axis = match const_input_ints(ctx.graph, &node, 2)?.as_slice() {
        [axis] => *axis,
        other => {
            return Err(ConvertError::unsupported(node.name(), format!("axis must be a scalar, got {:?}", other)))
        }
    };
    let axis = if axis < 0 && ctx.opset < 11 {
        let rank = ctx
            .graph
            .get_rank(node.input(0).unwrap_or_default())
            .ok_or_else(|| ConvertError::unsupported(node.name(), "negative axis needs a known rank"))?;
        normalize_axis(axis, rank)? as i64
    } else {
        axis
    };

    ctx.graph.set_node_inputs(id, node.inputs()[..2].to_vec());
    retarget(ctx, id, "Gather", &[])?;
    ctx.node_mut(id)?.set_attr("axis", axis);
    Ok(())
}
