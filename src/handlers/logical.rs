//! Comparison and boolean handlers
//!
//! `LessEqual`/`GreaterEqual` only exist from opset 12 and `NotEqual` never
//! does; they are emitted as `Not` of the opposite comparison.

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{NewNode, NodeId};
use crate::proto::tensor_proto::DataType;
use crate::tensor::is_float_type;

use super::registry::{register, HandlerRegistry};
use super::{insert_cast, retarget, source_dtype, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["Less", "Greater"] => { 1 => compare_v1, 7 => compare_v7 });
    register!(reg, ["Equal", "NotEqual"] => { 1 => compare_v1, 7 => compare_v7 });
    register!(reg, ["LessEqual", "GreaterEqual"] => { 1 => compare_v1, 7 => compare_v7 });
    register!(reg, ["LogicalAnd", "LogicalOr"] => { 1 => compare_v1, 7 => compare_v7 });
    register!(reg, ["LogicalNot"] => { 1 => logical_not });
}

/// Target kind and whether the result is negated
fn comparison_target(op_type: &str, opset: i64) -> Option<(&'static str, bool)> {
    let target = match op_type {
        "Less" => ("Less", false),
        "Greater" => ("Greater", false),
        "Equal" => ("Equal", false),
        "NotEqual" => ("Equal", true),
        "LessEqual" if opset >= 12 => ("LessOrEqual", false),
        "LessEqual" => ("Greater", true),
        "GreaterEqual" if opset >= 12 => ("GreaterOrEqual", false),
        "GreaterEqual" => ("Less", true),
        "LogicalAnd" => ("And", false),
        "LogicalOr" => ("Or", false),
        _ => return None,
    };
    Some(target)
}

/// Mirror of an ordering comparison when its operands are swapped
fn swapped(op: &str) -> &str {
    match op {
        "Less" => "Greater",
        "Greater" => "Less",
        other => other,
    }
}

fn comparison(ctx: &mut HandlerContext<'_>, id: NodeId, legacy_broadcast: bool) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    if node.inputs().len() != 2 {
        return Err(ConvertError::InvalidNode(format!(
            "{} expects 2 inputs, got {}",
            node.name(),
            node.inputs().len()
        )));
    }
    let (mut op, negate) = comparison_target(node.op_type(), ctx.opset)
        .ok_or_else(|| ConvertError::unsupported(node.name(), format!("no comparison for {}", node.op_type())))?;

    let dtype = source_dtype(ctx.graph, &node);
    let is_float = dtype.is_some_and(is_float_type);
    match op {
        // ordering comparisons accept integers from 9
        "Less" | "Greater" if ctx.opset < 9 && !is_float => {
            for idx in 0..2 {
                let cast = insert_cast(ctx.graph, node.input(idx).unwrap_or_default(), DataType::Float, node.name())?;
                ctx.graph.set_node_input(id, idx, cast);
            }
        }
        "Equal" if ctx.opset < 11 && is_float => {
            return Err(ConvertError::unsupported(node.name(), "Equal on floats needs opset 11"));
        }
        _ => {}
    }

    let shape0 = ctx.graph.get_shape(node.input(0).unwrap_or_default());
    let shape1 = ctx.graph.get_shape(node.input(1).unwrap_or_default());
    let differ = shape0 != shape1;
    // legacy broadcasting only stretches the second operand
    if legacy_broadcast && differ {
        if let (Some(r0), Some(r1)) = (shape0.rank(), shape1.rank()) {
            if r0 < r1 {
                ctx.graph.swap_inputs(id, 0, 1);
                op = swapped(op);
            }
        }
    }

    let inputs = ctx.node(id)?.inputs().to_vec();
    if negate {
        let name = ctx.graph.unique_name(&format!("{}/{}", node.name(), op.to_lowercase()));
        let mut inner = NewNode::new(op).name(name).inputs(inputs).dtypes(vec![DataType::Bool]);
        if legacy_broadcast {
            inner = inner.attr("broadcast", differ as i64);
        }
        let inner = ctx.graph.add_node(inner)?;
        let inner_out = ctx.graph.output_of(inner, 0);
        ctx.graph.set_node_inputs(id, vec![inner_out]);
        return retarget(ctx, id, "Not", &[]);
    }

    retarget(ctx, id, op, &[])?;
    if legacy_broadcast {
        ctx.node_mut(id)?.set_attr("broadcast", differ as i64);
    }
    Ok(())
}

/// Comparison with the explicit `broadcast` flag
fn compare_v1(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    comparison(ctx, id, true)
}

/// Comparison with implicit numpy broadcasting
fn compare_v7(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    comparison(ctx, id, false)
}

fn logical_not(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    retarget(ctx, id, "Not", &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::InitializedTables;
    use crate::graph::Graph;
    use crate::handlers::HandlerFn;
    use crate::tensor::Shape;

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

    fn compare_graph(op: &str, dtype: DataType) -> Graph {
        let mut graph = Graph::new(13);
        graph.add_input("a");
        graph.add_input("b");
        graph.set_dtype("a", dtype);
        graph.set_dtype("b", dtype);
        graph
            .add_node(NewNode::new(op).name("cmp").inputs(["a", "b"]).attr("T", dtype).source())
            .unwrap();
        graph
    }

    #[test]
    fn test_less_retargets() {
        let mut graph = compare_graph("Less", DataType::Int64);
        run(&mut graph, "cmp", compare_v7, 13).unwrap();
        let node = graph.node_by_name("cmp").unwrap();
        assert_eq!(node.op_type(), "Less");
        assert!(!node.has_attr("T"));
        assert_eq!(node.inputs(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_less_casts_integers_before_opset_9() {
        let mut graph = compare_graph("Less", DataType::Int32);
        run(&mut graph, "cmp", compare_v7, 8).unwrap();
        let node = graph.node_by_name("cmp").unwrap();
        for input in node.inputs() {
            let cast = graph.producer_node(input).unwrap();
            assert_eq!(cast.op_type(), "Cast");
            assert_eq!(cast.get_type("to").unwrap(), DataType::Float);
        }
    }

    #[test]
    fn test_less_equal_versions() {
        let mut graph = compare_graph("LessEqual", DataType::Float);
        run(&mut graph, "cmp", compare_v7, 12).unwrap();
        assert_eq!(graph.node_by_name("cmp").unwrap().op_type(), "LessOrEqual");

        let mut graph = compare_graph("LessEqual", DataType::Float);
        run(&mut graph, "cmp", compare_v7, 11).unwrap();
        let node = graph.node_by_name("cmp").unwrap();
        assert_eq!(node.op_type(), "Not");
        assert_eq!(node.outputs(), &["cmp:0".to_string()]);
        let inner = graph.producer_node(&node.inputs()[0]).unwrap();
        assert_eq!(inner.op_type(), "Greater");
        assert_eq!(inner.inputs(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_not_equal_negates() {
        let mut graph = compare_graph("NotEqual", DataType::Int64);
        run(&mut graph, "cmp", compare_v7, 13).unwrap();
        let node = graph.node_by_name("cmp").unwrap();
        assert_eq!(node.op_type(), "Not");
        assert_eq!(graph.producer_node(&node.inputs()[0]).unwrap().op_type(), "Equal");
    }

    #[test]
    fn test_float_equal_needs_opset_11() {
        let mut graph = compare_graph("Equal", DataType::Float);
        let err = run(&mut graph, "cmp", compare_v7, 10).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_legacy_broadcast_swaps_ordering() {
        let mut graph = compare_graph("Less", DataType::Float);
        graph.set_shape("a", Shape::known(vec![3]));
        graph.set_shape("b", Shape::known(vec![2, 3]));
        run(&mut graph, "cmp", compare_v1, 6).unwrap();
        let node = graph.node_by_name("cmp").unwrap();
        assert_eq!(node.op_type(), "Greater");
        assert_eq!(node.inputs(), &["b".to_string(), "a".to_string()]);
        assert_eq!(node.get_int("broadcast").unwrap(), 1);
    }

    #[test]
    fn test_logical_ops() {
        let mut graph = compare_graph("LogicalAnd", DataType::Bool);
        run(&mut graph, "cmp", compare_v7, 13).unwrap();
        assert_eq!(graph.node_by_name("cmp").unwrap().op_type(), "And");

        let mut graph = Graph::new(13);
        graph
            .add_node(NewNode::new("LogicalNot").name("not").input("x").source())
            .unwrap();
        run(&mut graph, "not", logical_not, 13).unwrap();
        assert_eq!(graph.node_by_name("not").unwrap().op_type(), "Not");
    }
}
