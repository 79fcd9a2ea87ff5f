//! Elementwise math, matrix multiplication and bias handlers

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{NewNode, NodeId, Target};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{Shape, TensorValue};

use super::registry::{register, HandlerRegistry};
use super::{insert_transpose, retarget, source_dtype, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Add", "AddV2", "Sub", "Mul", "RealDiv", "Div"] => {
        4 => broadcast_op_v4,
        7 => broadcast_op_v7,
    });
    register!(reg, ["Maximum", "Minimum"] => { 1 => min_max_v1, 8 => min_max_v8 });
    register!(reg, [
        "Relu", "Sigmoid", "Tanh", "Neg", "Abs", "Exp", "Log", "Sqrt", "Floor", "Ceil", "Reciprocal",
    ] => { 1 => unary_op });
    register!(reg, ["Relu6"] => { 1 => relu6_v1, 11 => relu6_v11 });
    register!(reg, ["Rsqrt"] => { 1 => rsqrt });
    register!(reg, ["MatMul", "BatchMatMul", "BatchMatMulV2"] => { 1 => matmul });
    register!(reg, ["BiasAdd"] => { 1 => bias_add_v1, 7 => bias_add_v7 });
}

/// Target kind for a source binary op
fn binary_target(op_type: &str) -> &str {
    match op_type {
        "AddV2" => "Add",
        "RealDiv" => "Div",
        other => other,
    }
}

// ============================================================================
// Broadcast binary ops
// ============================================================================

/// Rewrite scalar constant operands as one-element vectors
///
/// Returns the operand shapes after the rewrite.
fn scalar_consts_to_dim1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<[Shape; 2]> {
    let node = ctx.snapshot(id)?;
    let mut shapes = [Shape::unknown(), Shape::unknown()];
    for (i, shape) in shapes.iter_mut().enumerate() {
        let tensor = node.input(i).unwrap_or_default();
        *shape = ctx.graph.get_shape(tensor);
        if !shape.is_scalar() {
            continue;
        }
        let Some(value) = ctx.graph.const_value(tensor).cloned() else {
            continue;
        };
        let name = ctx.graph.unique_name(&format!("{}/dim1", node.name()));
        let dim1 = ctx.graph.make_const_tensor(&name, value.reshaped(vec![1])?)?;
        ctx.graph.set_node_input(id, i, dim1);
        *shape = Shape::known(vec![1]);
    }
    Ok(shapes)
}

/// Shared broadcast handling; returns whether the operand shapes differ
fn broadcast_common(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<bool> {
    let node = ctx.node(id)?;
    if node.inputs().len() != 2 {
        return Err(ConvertError::InvalidNode(format!(
            "{} expects 2 inputs, got {}",
            node.name(),
            node.inputs().len()
        )));
    }
    let op = binary_target(node.op_type()).to_string();
    let shape0 = ctx.graph.get_shape(node.input(0).unwrap_or_default());
    let shape1 = ctx.graph.get_shape(node.input(1).unwrap_or_default());
    retarget(ctx, id, &op, &[])?;

    if shape0 == shape1 {
        return Ok(false);
    }
    let (shape0, shape1) = if ctx.graph.is_target(Target::Rs4) {
        let [a, b] = scalar_consts_to_dim1(ctx, id)?;
        (a, b)
    } else {
        (shape0, shape1)
    };
    // runtimes broadcast the second operand only
    if let (Some(r0), Some(r1)) = (shape0.rank(), shape1.rank()) {
        if r0 > 0 && r1 > 0 && r0 < r1 && (op == "Mul" || op == "Add") {
            ctx.graph.swap_inputs(id, 0, 1);
        }
    }
    Ok(true)
}

/// Binary op with the explicit `broadcast` flag
fn broadcast_op_v4(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let differ = broadcast_common(ctx, id)?;
    ctx.node_mut(id)?.set_attr("broadcast", differ as i64);
    Ok(())
}

/// Binary op with implicit numpy broadcasting
fn broadcast_op_v7(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    broadcast_common(ctx, id).map(|_| ())
}

// ============================================================================
// Max / Min
// ============================================================================

fn min_max_target(op_type: &str) -> &'static str {
    if op_type == "Maximum" {
        "Max"
    } else {
        "Min"
    }
}

/// Variadic `Max`/`Min` before broadcasting was allowed
fn min_max_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.node(id)?;
    let shapes: Vec<Shape> = node.inputs().iter().map(|t| ctx.graph.get_shape(t)).collect();
    if shapes.windows(2).any(|w| w[0] != w[1]) {
        return Err(ConvertError::unsupported(
            node.name(),
            "broadcasting Max/Min needs opset 8",
        ));
    }
    let op = min_max_target(node.op_type());
    retarget(ctx, id, op, &[])
}

fn min_max_v8(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let op = min_max_target(ctx.node(id)?.op_type());
    retarget(ctx, id, op, &[])
}

// ============================================================================
// Unary ops
// ============================================================================

fn unary_op(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let op = ctx.node(id)?.op_type().to_string();
    retarget(ctx, id, &op, &[])
}

/// `Relu6` as `Clip` with bounds in attributes
fn relu6_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    retarget(ctx, id, "Clip", &[])?;
    let node = ctx.node_mut(id)?;
    node.set_attr("min", 0.0f32);
    node.set_attr("max", 6.0f32);
    Ok(())
}

/// `Relu6` as `Clip` with bound inputs
fn relu6_v11(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let dtype = source_dtype(ctx.graph, &node).unwrap_or(DataType::Float);
    let input = node.input(0).unwrap_or_default().to_string();

    let mut bound = |value: f32, suffix: &str| -> ConvertResult<String> {
        let name = ctx.graph.unique_name(&format!("{}/{}", node.name(), suffix));
        let value = TensorValue::scalar_f32(value).cast(dtype)?;
        ctx.graph.make_const_tensor(&name, value)
    };
    let min = bound(0.0, "min")?;
    let max = bound(6.0, "max")?;

    ctx.graph.set_node_inputs(id, vec![input, min, max]);
    retarget(ctx, id, "Clip", &[])
}

/// `Rsqrt(x)` as `Reciprocal(Sqrt(x))`
fn rsqrt(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let name = ctx.graph.unique_name(&format!("{}/sqrt", node.name()));
    let sqrt = ctx
        .graph
        .add_node(NewNode::new("Sqrt").name(name).input(node.input(0).unwrap_or_default()))?;
    let sqrt_out = ctx.graph.output_of(sqrt, 0);
    ctx.graph.set_node_input(id, 0, sqrt_out);
    retarget(ctx, id, "Reciprocal", &[])
}

// ============================================================================
// MatMul
// ============================================================================

/// Permutation swapping the last two axes
fn swap_last_two(rank: usize) -> Vec<i64> {
    let mut perm: Vec<i64> = (0..rank as i64).collect();
    perm.swap(rank - 2, rank - 1);
    perm
}

/// `MatMul` with explicit transposes for the adjoint/transpose flags
fn matmul(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let flags = [
        node.get_bool_or("transpose_a", false)? || node.get_bool_or("adj_x", false)?,
        node.get_bool_or("transpose_b", false)? || node.get_bool_or("adj_y", false)?,
    ];

    for (i, transpose) in flags.into_iter().enumerate() {
        if !transpose {
            continue;
        }
        let input = node.input(i).unwrap_or_default();
        let rank = match ctx.graph.get_rank(input) {
            Some(r) if r >= 2 => r,
            _ => {
                return Err(ConvertError::unsupported(
                    node.name(),
                    format!("transposed operand {} needs a known rank of at least 2", input),
                ))
            }
        };
        let transposed = insert_transpose(ctx.graph, input, &swap_last_two(rank), node.name())?;
        ctx.graph.set_node_input(id, i, transposed);
    }
    retarget(ctx, id, "MatMul", &[])
}

// ============================================================================
// BiasAdd
// ============================================================================

fn is_nchw(ctx: &HandlerContext<'_>, id: NodeId) -> ConvertResult<bool> {
    let format = ctx.node(id)?.get_string_or("data_format", "NHWC".to_string())?;
    Ok(format.starts_with("NC"))
}

/// `BiasAdd` as `Add` with the legacy broadcast flag
fn bias_add_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let nchw = is_nchw(ctx, id)?;
    retarget(ctx, id, "Add", &[])?;
    let node = ctx.node_mut(id)?;
    node.set_attr("broadcast", 1i64);
    if nchw {
        node.set_attr("axis", 1i64);
    }
    Ok(())
}

/// `BiasAdd` as `Add`; channel-first bias is reshaped to `[C, 1, ..]`
fn bias_add_v7(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    if is_nchw(ctx, id)? {
        let node = ctx.snapshot(id)?;
        let rank = ctx
            .graph
            .get_rank(node.input(0).unwrap_or_default())
            .ok_or_else(|| ConvertError::unsupported(node.name(), "NCHW bias needs a known input rank"))?;
        let mut dims = vec![-1i64];
        dims.extend(std::iter::repeat(1).take(rank.saturating_sub(2)));

        let bias = node.input(1).unwrap_or_default().to_string();
        let reshaped = match ctx.graph.const_value(&bias).cloned() {
            Some(value) => {
                let len = value.num_elements() as i64;
                dims[0] = len;
                let name = ctx.graph.unique_name(&format!("{}/bias", node.name()));
                ctx.graph.make_const_tensor(&name, value.reshaped(dims)?)?
            }
            None => {
                let shape = super::int64_const(ctx.graph, &format!("{}/bias_shape", node.name()), dims)?;
                let name = ctx.graph.unique_name(&format!("{}/bias_reshape", node.name()));
                let reshape = ctx
                    .graph
                    .add_node(NewNode::new("Reshape").name(name).inputs([bias, shape]))?;
                ctx.graph.output_of(reshape, 0)
            }
        };
        ctx.graph.set_node_input(id, 1, reshaped);
    }
    retarget(ctx, id, "Add", &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::InitializedTables;
    use crate::graph::Graph;
    use crate::handlers::HandlerFn;

    fn run(graph: &mut Graph, name: &str, handler: HandlerFn, opset: i64) -> ConvertResult<()> {
        let id = graph.node_id(name).unwrap();
        let tables = InitializedTables::new();
        let mut ctx = HandlerContext {
            graph,
            tables: &tables,
            opset,
        };
        handler(&mut ctx, id)
    }

    fn make_binary(op: &str, a: Vec<i64>, b: Vec<i64>) -> Graph {
        let mut graph = Graph::new(4);
        for (name, dims) in [("a", a), ("b", b)] {
            graph.add_input(name);
            graph.set_shape(name, Shape::known(dims));
            graph.set_dtype(name, DataType::Float);
        }
        graph
            .add_node(NewNode::new(op).name("op").inputs(["a", "b"]).source())
            .unwrap();
        graph
    }

    #[test]
    fn test_broadcast_v4_sets_flag_and_swaps() {
        let mut graph = make_binary("AddV2", vec![3], vec![2, 3]);
        run(&mut graph, "op", broadcast_op_v4, 4).unwrap();
        let node = graph.node_by_name("op").unwrap();
        assert_eq!(node.op_type(), "Add");
        assert_eq!(node.get_int("broadcast").unwrap(), 1);
        assert_eq!(node.inputs(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_broadcast_v4_same_shape() {
        let mut graph = make_binary("Sub", vec![2, 3], vec![2, 3]);
        run(&mut graph, "op", broadcast_op_v4, 4).unwrap();
        let node = graph.node_by_name("op").unwrap();
        assert_eq!(node.get_int("broadcast").unwrap(), 0);
    }

    #[test]
    fn test_broadcast_v7_no_flag() {
        let mut graph = make_binary("RealDiv", vec![3], vec![2, 3]);
        run(&mut graph, "op", broadcast_op_v7, 7).unwrap();
        let node = graph.node_by_name("op").unwrap();
        assert_eq!(node.op_type(), "Div");
        assert!(!node.has_attr("broadcast"));
        // only Add and Mul are commutative
        assert_eq!(node.inputs()[0], "a");
    }

    #[test]
    fn test_rs4_scalar_const_becomes_dim1() {
        let mut graph = Graph::new(7);
        graph.set_targets(vec![Target::Rs4]);
        graph.add_input("a");
        graph.set_shape("a", Shape::known(vec![2, 3]));
        graph.make_const("two", TensorValue::scalar_f32(2.0)).unwrap();
        graph
            .add_node(NewNode::new("Mul").name("op").inputs(["a", "two"]).source())
            .unwrap();
        run(&mut graph, "op", broadcast_op_v7, 7).unwrap();

        let node = graph.node_by_name("op").unwrap();
        let operand = graph.const_value(&node.inputs()[1]).unwrap();
        assert_eq!(operand.dims(), &[1]);
    }

    #[test]
    fn test_relu6_v11_inputs() {
        let mut graph = Graph::new(11);
        graph
            .add_node(
                NewNode::new("Relu6")
                    .name("r")
                    .input("x")
                    .attr("T", DataType::Float)
                    .source(),
            )
            .unwrap();
        run(&mut graph, "r", relu6_v11, 11).unwrap();
        let node = graph.node_by_name("r").unwrap();
        assert_eq!(node.op_type(), "Clip");
        assert_eq!(node.inputs().len(), 3);
        let max = graph.const_value(&node.inputs()[2]).unwrap();
        assert_eq!(max.as_f32s(), Some(vec![6.0]));
    }

    #[test]
    fn test_rsqrt_expansion() {
        let mut graph = Graph::new(13);
        graph
            .add_node(NewNode::new("Rsqrt").name("r").input("x").source())
            .unwrap();
        run(&mut graph, "r", rsqrt, 13).unwrap();
        let node = graph.node_by_name("r").unwrap();
        assert_eq!(node.op_type(), "Reciprocal");
        let sqrt = graph.producer_node(&node.inputs()[0]).unwrap();
        assert_eq!(sqrt.op_type(), "Sqrt");
    }

    #[test]
    fn test_matmul_transpose_b() {
        let mut graph = Graph::new(13);
        graph.add_input("a");
        graph.add_input("b");
        graph.set_shape("b", Shape::known(vec![4, 3]));
        graph
            .add_node(
                NewNode::new("MatMul")
                    .name("mm")
                    .inputs(["a", "b"])
                    .attr("transpose_b", 1i64)
                    .source(),
            )
            .unwrap();
        run(&mut graph, "mm", matmul, 13).unwrap();
        let node = graph.node_by_name("mm").unwrap();
        assert!(!node.has_attr("transpose_b"));
        let t = graph.producer_node(&node.inputs()[1]).unwrap();
        assert_eq!(t.get_ints("perm").unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_matmul_unknown_rank_unsupported() {
        let mut graph = Graph::new(13);
        graph
            .add_node(
                NewNode::new("BatchMatMul")
                    .name("mm")
                    .inputs(["a", "b"])
                    .attr("adj_x", 1i64)
                    .source(),
            )
            .unwrap();
        let err = run(&mut graph, "mm", matmul, 13).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_bias_add_nchw_const_bias() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.set_shape("x", Shape::known(vec![1, 3, 8, 8]));
        graph.make_const("bias", TensorValue::vec_f32(vec![1.0, 2.0, 3.0])).unwrap();
        graph
            .add_node(
                NewNode::new("BiasAdd")
                    .name("b")
                    .inputs(["x", "bias"])
                    .attr("data_format", "NCHW")
                    .source(),
            )
            .unwrap();
        run(&mut graph, "b", bias_add_v7, 13).unwrap();
        let node = graph.node_by_name("b").unwrap();
        assert_eq!(node.op_type(), "Add");
        assert_eq!(graph.const_value(&node.inputs()[1]).unwrap().dims(), &[3, 1, 1]);
    }
}
