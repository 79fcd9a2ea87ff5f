//! Softmax, convolution and pooling handlers
//!
//! Source convolutions and pools default to channel-last layout. The
//! target ops are channel-first, so channel-last nodes are wrapped in a
//! pair of transposes; the transpose optimizer later cancels adjacent
//! pairs between consecutive layers.

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{AttrMap, AttrValue, NewNode, Node, NodeId};
use crate::tensor::transpose_value;

use super::registry::{register, HandlerRegistry};
use super::{insert_transpose, retarget, HandlerContext, HWIO_TO_OIHW, NCHW_TO_NHWC, NHWC_TO_NCHW};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Softmax", "LogSoftmax"] => { 1 => softmax_v1, 13 => softmax_v13 });
    register!(reg, ["Conv2D"] => { 1 => conv2d });
    register!(reg, ["MaxPool", "AvgPool"] => { 1 => pool });
}

// ============================================================================
// Softmax
// ============================================================================

/// Before 13 the axis flattens trailing dims, so it must name the last one
fn softmax_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.node(id)?;
    let rank = ctx
        .graph
        .get_rank(node.input(0).unwrap_or_default())
        .ok_or_else(|| ConvertError::unsupported(node.name(), "softmax input rank must be known"))?;
    let op = node.op_type().to_string();
    retarget(ctx, id, &op, &[])?;
    ctx.node_mut(id)?.set_attr("axis", rank.saturating_sub(1) as i64);
    Ok(())
}

fn softmax_v13(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let op = ctx.node(id)?.op_type().to_string();
    retarget(ctx, id, &op, &[])?;
    ctx.node_mut(id)?.set_attr("axis", -1i64);
    Ok(())
}

// ============================================================================
// Spatial attributes
// ============================================================================

/// Layout and window attributes shared by convolution and pooling
struct Spatial {
    nchw: bool,
    strides: Vec<i64>,
    dilations: Vec<i64>,
    kernel: Option<Vec<i64>>,
}

impl Spatial {
    /// Read layout, strides, dilations and (for pools) `ksize`
    fn parse(node: &Node) -> ConvertResult<Self> {
        let nchw = node
            .get_string_or("data_format", "NHWC".to_string())?
            .starts_with("NC");
        let pick = |attr: &str| -> ConvertResult<Vec<i64>> {
            let values = node.get_ints_or(attr, vec![1, 1, 1, 1])?;
            if values.len() != 4 {
                return Err(ConvertError::unsupported(
                    node.name(),
                    format!("{} must have 4 entries, got {:?}", attr, values),
                ));
            }
            Ok(if nchw { values[2..].to_vec() } else { values[1..3].to_vec() })
        };
        let kernel = if node.has_attr("ksize") {
            Some(pick("ksize")?)
        } else {
            None
        };
        Ok(Self {
            nchw,
            strides: pick("strides")?,
            dilations: pick("dilations")?,
            kernel,
        })
    }

    /// Target padding attributes for the source `padding` mode
    fn padding_attrs(node: &Node, nchw: bool, attrs: &mut AttrMap) -> ConvertResult<()> {
        let padding = node.get_string_or("padding", "VALID".to_string())?;
        match padding.as_str() {
            "SAME" => {
                attrs.insert("auto_pad".into(), AttrValue::from("SAME_UPPER"));
            }
            "VALID" => {
                attrs.insert("auto_pad".into(), AttrValue::from("VALID"));
            }
            "EXPLICIT" => {
                let explicit = node.get_ints("explicit_paddings")?;
                if explicit.len() != 8 {
                    return Err(ConvertError::unsupported(node.name(), "explicit_paddings must have 8 entries"));
                }
                // pairs per dim in source layout: (begin, end)
                let (h, w) = if nchw { (2, 3) } else { (1, 2) };
                let pads = vec![explicit[2 * h], explicit[2 * w], explicit[2 * h + 1], explicit[2 * w + 1]];
                attrs.insert("pads".into(), AttrValue::from(pads));
            }
            other => {
                return Err(ConvertError::unsupported(node.name(), format!("padding mode {}", other)));
            }
        }
        Ok(())
    }
}

/// Emit the channel-first op and route the source outputs through it
///
/// Channel-last nodes read a transposed input and the original node is
/// replaced by the transpose back, keeping its name and output ids.
fn emit_channel_first(
    ctx: &mut HandlerContext<'_>,
    id: NodeId,
    node: &Node,
    nchw: bool,
    op: NewNode,
) -> ConvertResult<()> {
    if nchw {
        ctx.graph.replace_node(id, op)?;
        return Ok(());
    }
    let name = ctx.graph.unique_name(&format!("{}/nchw", node.name()));
    let inner = ctx.graph.add_node(op.name(name))?;
    let inner_out = ctx.graph.output_of(inner, 0);
    ctx.graph.replace_node(
        id,
        NewNode::new("Transpose")
            .input(inner_out)
            .attr("perm", NCHW_TO_NHWC.to_vec()),
    )?;
    Ok(())
}

// ============================================================================
// Conv2D
// ============================================================================

fn conv2d(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let spatial = Spatial::parse(&node)?;
    let x = node.input(0).unwrap_or_default();
    let w = node.input(1).unwrap_or_default();

    let mut attrs = AttrMap::new();
    attrs.insert("strides".into(), spatial.strides.clone().into());
    attrs.insert("dilations".into(), spatial.dilations.clone().into());
    if let Some(dims) = ctx.graph.get_shape(w).dims().filter(|d| d.len() == 4) {
        if dims[0] >= 0 && dims[1] >= 0 {
            attrs.insert("kernel_shape".into(), vec![dims[0], dims[1]].into());
        }
    }
    Spatial::padding_attrs(&node, spatial.nchw, &mut attrs)?;

    let x_in = if spatial.nchw {
        x.to_string()
    } else {
        insert_transpose(ctx.graph, x, &NHWC_TO_NCHW, node.name())?
    };
    let w_in = match ctx.graph.const_value(w).cloned() {
        Some(value) => {
            let name = ctx.graph.unique_name(&format!("{}/weights", node.name()));
            ctx.graph
                .make_const_tensor(&name, transpose_value(&value, &HWIO_TO_OIHW)?)?
        }
        None => insert_transpose(ctx.graph, w, &HWIO_TO_OIHW, node.name())?,
    };

    let conv = NewNode::new("Conv").inputs([x_in, w_in]).attrs(attrs);
    emit_channel_first(ctx, id, &node, spatial.nchw, conv)
}

// ============================================================================
// Pooling
// ============================================================================

fn pool(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let spatial = Spatial::parse(&node)?;
    let kernel = spatial
        .kernel
        .clone()
        .ok_or_else(|| ConvertError::MissingAttribute {
            node: node.name().to_string(),
            attr: "ksize".to_string(),
        })?;
    let x = node.input(0).unwrap_or_default();

    let op = if node.is_op("MaxPool") { "MaxPool" } else { "AveragePool" };
    let mut attrs = AttrMap::new();
    attrs.insert("kernel_shape".into(), kernel.into());
    attrs.insert("strides".into(), spatial.strides.clone().into());
    Spatial::padding_attrs(&node, spatial.nchw, &mut attrs)?;

    let x_in = if spatial.nchw {
        x.to_string()
    } else {
        insert_transpose(ctx.graph, x, &NHWC_TO_NCHW, node.name())?
    };
    let pool = NewNode::new(op).input(x_in).attrs(attrs);
    emit_channel_first(ctx, id, &node, spatial.nchw, pool)
}
