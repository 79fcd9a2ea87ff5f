//! End-to-end conversion properties
//!
//! Each test builds a small frozen graph, runs the public API, and checks
//! one observable guarantee of the converter.
//!
//! Run with: cargo test --test properties

use frozen2onnx::builder::check_model;
use frozen2onnx::convert::{
    convert, ConvertOptions, Converter, FrozenFunction, FrozenGraph, InitializedTables, SourceNode, TableEntry,
};
use frozen2onnx::error::ConvertError;
use frozen2onnx::graph::{Graph, NewNode, NodeId};
use frozen2onnx::handlers::{HandlerContext, HandlerRegistry};
use frozen2onnx::optimizer::OptimizerPipeline;
use frozen2onnx::proto::tensor_proto::DataType;
use frozen2onnx::tensor::{TensorData, TensorValue};
use frozen2onnx::ConvertResult;
use prost::Message;

// ============================================================================
// Helpers
// ============================================================================

fn image_source() -> FrozenGraph {
    let weights = TensorValue::new(vec![3, 3, 3, 4], TensorData::Float(vec![0.25; 108])).unwrap();
    let mut source = FrozenGraph::new();
    source
        .push(SourceNode::new("image", "Placeholder").output(vec![1, 8, 8, 3], DataType::Float))
        .push(SourceNode::new("weights", "Const").attr("value", weights).untyped_output())
        .push(
            SourceNode::new("conv", "Conv2D")
                .inputs(["image:0", "weights:0"])
                .attr("strides", vec![1i64, 1, 1, 1])
                .attr("padding", "SAME")
                .attr("T", DataType::Float)
                .untyped_output(),
        )
        .push(SourceNode::new("relu", "Relu").input("conv:0").untyped_output())
        .push(
            SourceNode::new("pool", "MaxPool")
                .input("relu:0")
                .attr("ksize", vec![1i64, 2, 2, 1])
                .attr("strides", vec![1i64, 2, 2, 1])
                .attr("padding", "VALID")
                .untyped_output(),
        );
    source
}

fn count_op(graph: &Graph, op_type: &str) -> usize {
    graph.find_nodes_by_op(op_type).len()
}

fn lookup_source(key: &str) -> FrozenGraph {
    let mut source = FrozenGraph::new();
    source
        .push(
            SourceNode::new("table", "HashTableV2")
                .attr("shared_name", "vocab")
                .untyped_output(),
        )
        .push(SourceNode::new("key", "Const").attr("value", TensorValue::scalar_string(key)).untyped_output())
        .push(SourceNode::new("default", "Const").attr("value", TensorValue::scalar_i64(0)).untyped_output())
        .push(
            SourceNode::new("find", "LookupTableFindV2")
                .inputs(["table:0", "key:0", "default:0"])
                .attr("Tin", DataType::String)
                .attr("Tout", DataType::Int64)
                .untyped_output(),
        );
    source
}

fn names(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// `while i < 10: i += 1`, optionally collecting `i * i` in a tensor list
fn loop_source(accumulate: bool) -> FrozenGraph {
    let mut cond = FrozenGraph::new();
    cond.push(SourceNode::new("limit", "Const").attr("value", TensorValue::scalar_i64(10)).untyped_output())
        .push(SourceNode::new("less", "Less").inputs(["i", "limit:0"]).untyped_output());

    let mut body = FrozenGraph::new();
    body.push(SourceNode::new("one", "Const").attr("value", TensorValue::scalar_i64(1)).untyped_output())
        .push(SourceNode::new("next", "AddV2").inputs(["i", "one:0"]).untyped_output());

    let mut source = FrozenGraph::new();
    source.push(SourceNode::new("start", "Const").attr("value", TensorValue::scalar_i64(0)).untyped_output());

    let mut w = SourceNode::new("w", "While")
        .input("start:0")
        .subgraph("cond", "cond_fn")
        .subgraph("body", "body_fn")
        .untyped_output();
    let (loop_vars, body_outputs) = if accumulate {
        body.push(SourceNode::new("sq", "Mul").inputs(["i", "i"]).untyped_output())
            .push(
                SourceNode::new("set", "TensorListSetItem")
                    .inputs(["list", "i", "sq:0"])
                    .untyped_output(),
            );
        source
            .push(SourceNode::new("n", "Const").attr("value", TensorValue::scalar_i64(10)).untyped_output())
            .push(SourceNode::new("reserve", "TensorListReserve").input("n:0").untyped_output())
            .push(
                SourceNode::new("stack", "TensorListStack")
                    .input("w:1")
                    .attr("element_dtype", DataType::Int64)
                    .untyped_output(),
            );
        w = w.input("reserve:0").untyped_output();
        (names(&["i", "list"]), names(&["next:0", "set:0"]))
    } else {
        (names(&["i"]), names(&["next:0"]))
    };

    source.add_function(
        "cond_fn",
        FrozenFunction {
            graph: cond,
            inputs: loop_vars.clone(),
            outputs: names(&["less:0"]),
        },
    );
    source.add_function(
        "body_fn",
        FrozenFunction {
            graph: body,
            inputs: loop_vars,
            outputs: body_outputs,
        },
    );
    source.push(w);
    source
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn completed_conversion_has_only_target_nodes() {
    let conversion = convert(&image_source(), &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();

    assert!(conversion.report.is_complete());
    for (_, node) in conversion.graph.nodes() {
        assert!(node.is_converted(), "{} ({}) left in source form", node.name(), node.op_type());
    }
    for output in conversion.graph.outputs() {
        assert!(conversion.graph.producer(output).is_some());
    }
    assert_eq!(count_op(&conversion.graph, "Conv2D"), 0);
    assert_eq!(count_op(&conversion.graph, "Conv"), 1);
    assert_eq!(count_op(&conversion.graph, "MaxPool"), 1);
}

#[test]
fn optimizer_is_idempotent() {
    let mut conversion = convert(&image_source(), &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();
    assert!(conversion.report.optimizer.as_ref().unwrap().converged);

    let before = conversion.graph.node_count();
    let again = OptimizerPipeline::default().run(&mut conversion.graph).unwrap();
    assert_eq!(again.iterations, 1);
    assert!(again.converged);
    assert_eq!(again.nodes_changed(), 0);
    assert_eq!(again.nodes_removed(), 0);
    assert_eq!(conversion.graph.node_count(), before);
}

#[test]
fn optimizer_cancels_layout_transposes() {
    let plain = convert(
        &image_source(),
        &["image:0"],
        &["pool:0"],
        ConvertOptions::default().optimize(false),
    )
    .unwrap();
    let optimized = convert(&image_source(), &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();

    assert!(count_op(&optimized.graph, "Transpose") < count_op(&plain.graph, "Transpose"));
}

#[test]
fn conversion_is_deterministic() {
    let first = convert(&image_source(), &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();
    let second = convert(&image_source(), &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();

    assert_eq!(first.model.encode_to_vec(), second.model.encode_to_vec());
    assert_eq!(first.report.op_counts, second.report.op_counts);
}

#[test]
fn nodes_off_every_output_path_are_removed() {
    let mut source = image_source();
    source
        .push(SourceNode::new("side", "Exp").input("image:0").untyped_output())
        .push(SourceNode::new("side_neg", "Neg").input("side:0").untyped_output());

    let conversion = convert(&source, &["image:0"], &["pool:0"], ConvertOptions::default()).unwrap();
    assert!(!conversion.graph.has_node("side"));
    assert!(!conversion.graph.has_node("side_neg"));
    assert!(conversion.graph.is_graph_input("image:0"));

    let proto = conversion.model.graph.unwrap();
    assert_eq!(proto.count_op("Exp"), 0);
    assert_eq!(proto.count_op("Neg"), 0);
}

#[test]
fn static_lookup_folds_to_constant() {
    let mut tables = InitializedTables::new();
    tables.insert("vocab", TableEntry::new(vec!["a".into(), "b".into()], vec![1, 2]));

    for (key, expected) in [("b", 2), ("z", 0)] {
        let source = lookup_source(key);
        let conversion = Converter::new(&source)
            .outputs(["find:0"])
            .tables(tables.clone())
            .convert()
            .unwrap();

        let value = conversion.graph.const_value("find:0").unwrap();
        assert_eq!(value.as_scalar_i64(), Some(expected), "key {}", key);
        assert!(!conversion.graph.has_node("table"));
        assert_eq!(count_op(&conversion.graph, "LookupTableFindV2"), 0);
    }
}

#[test]
fn missing_table_is_fatal() {
    let source = lookup_source("a");
    let err = Converter::new(&source)
        .outputs(["find:0"])
        .options(ConvertOptions::default().continue_on_error(true))
        .convert()
        .unwrap_err();
    assert!(matches!(err, ConvertError::MissingTable { .. }));
}

#[test]
fn constant_add_folds() {
    let mut source = FrozenGraph::new();
    source
        .push(SourceNode::new("a", "Const").attr("value", TensorValue::scalar_f32(2.0)).untyped_output())
        .push(SourceNode::new("b", "Const").attr("value", TensorValue::scalar_f32(3.0)).untyped_output())
        .push(SourceNode::new("sum", "AddV2").inputs(["a:0", "b:0"]).untyped_output());

    let conversion = convert(&source, &[], &["sum:0"], ConvertOptions::default()).unwrap();
    let value = conversion.graph.const_value("sum:0").unwrap();
    assert_eq!(value.as_f32s(), Some(vec![5.0]));
    assert!(!conversion.graph.has_node("a"));
    assert!(!conversion.graph.has_node("b"));
    assert_eq!(conversion.graph.node_count(), 1);
}

#[test]
fn unsupported_ops_accumulate() {
    let mut source = image_source();
    source.push(SourceNode::new("mystery", "Frobnicate").input("pool:0").untyped_output());

    let options = ConvertOptions::default().continue_on_error(true);
    let conversion = convert(&source, &["image:0"], &["mystery:0"], options).unwrap();

    assert_eq!(conversion.report.unconverted.len(), 1);
    let entry = &conversion.report.unconverted[0];
    assert_eq!(entry.name, "mystery");
    assert_eq!(entry.op_type, "Frobnicate");
    assert!(!conversion.report.is_complete());
}

#[test]
fn replace_all_inputs_rewires_every_consumer() {
    let mut graph = Graph::new(13);
    graph.add_input("x");
    graph.add_input("y");
    graph.add_node(NewNode::new("Relu").name("r").input("x")).unwrap();
    graph.add_node(NewNode::new("Add").name("a").inputs(["x", "x"])).unwrap();
    graph.set_outputs(vec!["x".to_string()]);

    assert_eq!(graph.replace_all_inputs("x", "y"), 3);
    assert_eq!(graph.node_by_name("r").unwrap().inputs(), &["y".to_string()]);
    assert_eq!(graph.node_by_name("a").unwrap().inputs(), &["y".to_string(), "y".to_string()]);
    assert_eq!(graph.consumer_count("x"), 0);
    assert_eq!(graph.consumer_count("y"), 3);
    // designated outputs keep their names
    assert_eq!(graph.outputs(), &["x".to_string()]);
}

fn handler_v4(_: &mut HandlerContext<'_>, _: NodeId) -> ConvertResult<()> {
    Ok(())
}

fn handler_v7(_: &mut HandlerContext<'_>, _: NodeId) -> ConvertResult<()> {
    Ok(())
}

fn handler_v9(_: &mut HandlerContext<'_>, _: NodeId) -> ConvertResult<()> {
    Ok(())
}

#[test]
fn dispatch_picks_newest_version_not_above_opset() {
    let mut registry = HandlerRegistry::new();
    registry.register("Widget", 9, handler_v9);
    registry.register("Widget", 4, handler_v4);
    registry.register("Widget", 7, handler_v7);

    assert_eq!(registry.resolve_entry("Widget", 8).map(|(v, _)| v), Some(7));
    assert_eq!(registry.resolve_entry("Widget", 9).map(|(v, _)| v), Some(9));
    assert_eq!(registry.resolve_entry("Widget", 4).map(|(v, _)| v), Some(4));
    assert!(registry.resolve("Widget", 3).is_none());
    assert_eq!(registry.versions("Widget"), vec![4, 7, 9]);
}

#[test]
fn builtin_registry_dispatches_by_opset() {
    let registry = HandlerRegistry::builtin();
    assert_eq!(registry.resolve_entry("Softmax", 12).map(|(v, _)| v), Some(1));
    assert_eq!(registry.resolve_entry("Softmax", 13).map(|(v, _)| v), Some(13));
    assert!(registry.resolve("While", 8).is_none());
}

#[test]
fn while_loop_converts_to_loop() {
    let conversion = convert(&loop_source(false), &[], &["w:0"], ConvertOptions::default()).unwrap();
    assert!(conversion.report.is_complete());
    check_model(&conversion.model).unwrap();

    let node = conversion.graph.node_by_name("w").unwrap();
    assert_eq!(node.op_type(), "Loop");
    // (max trip count, initial condition, carried...)
    assert_eq!(node.inputs().len(), 3);
    assert_eq!(node.inputs()[0], "");
    assert_eq!(node.outputs(), &["w:0".to_string()]);

    // (iteration, condition, carried...) -> (condition, carried...)
    let body = node.get_graph("body").unwrap();
    assert_eq!(body.inputs().len(), 3);
    assert_eq!(body.outputs().len(), 2);
    assert_eq!(body.producer_node(&body.outputs()[0]).unwrap().op_type(), "Less");
    assert_eq!(body.producer_node(&body.outputs()[1]).unwrap().op_type(), "Add");
    assert_eq!(count_op(&conversion.graph, "While"), 0);
}

#[test]
fn tensor_list_accumulator_becomes_scan_output() {
    let conversion = convert(&loop_source(true), &[], &["stack:0"], ConvertOptions::default()).unwrap();
    assert!(conversion.report.is_complete());
    check_model(&conversion.model).unwrap();

    let node = conversion.graph.node_by_name("w").unwrap();
    assert_eq!(node.op_type(), "Loop");
    // the list slot is gone from the carried values
    assert_eq!(node.inputs().len(), 3);
    assert_eq!(node.outputs(), &["w:0".to_string(), "stack:0".to_string()]);
    assert!(!node.has_attr("num_scan_outputs"));

    // (condition, carried..., scans...)
    let body = node.get_graph("body").unwrap();
    assert_eq!(body.inputs().len(), 3);
    assert_eq!(body.outputs().len(), 3);
    assert_eq!(body.producer_node(&body.outputs()[2]).unwrap().op_type(), "Mul");
    assert_eq!(body.find_nodes_by_op("TensorListSetItem").len(), 0);

    for op in ["TensorListReserve", "TensorListStack", "While"] {
        assert_eq!(count_op(&conversion.graph, op), 0, "{} left behind", op);
    }
}
