//! Source graph import
//!
//! Builds the working [`Graph`] from a [`FrozenGraph`]: every source node
//! becomes an unconverted node with its declared output facts, functions
//! referenced by nodes become nested graphs, and the caller's input options
//! are applied before dispatch sees anything.

use log::debug;
use rustc_hash::FxHashSet;

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, NewNode};
use crate::handlers::NCHW_TO_NHWC;
use crate::tensor::Shape;

use super::options::ConvertOptions;
use super::source::{FrozenFunction, FrozenGraph, SourceNode};

/// Build the top-level graph with its designated inputs and outputs
pub fn import_graph(
    source: &FrozenGraph,
    inputs: &[String],
    outputs: &[String],
    options: &ConvertOptions,
) -> ConvertResult<Graph> {
    let mut graph = Graph::with_name(options.model_name.clone(), options.opset);
    graph.set_targets(options.targets.clone());
    for extra in &options.extra_opsets {
        graph.add_extra_opset(extra.clone());
    }

    let mut visiting = FxHashSet::default();
    add_nodes(&mut graph, source, options, &mut visiting)?;

    for input in inputs {
        if graph.producer(input).is_none() {
            return Err(ConvertError::InvalidGraph(format!(
                "designated input {} has no placeholder",
                input
            )));
        }
    }
    graph.set_inputs(inputs.to_vec());
    graph.set_outputs(outputs.to_vec());

    apply_defaults(&mut graph, options)?;
    for (tensor, shape) in &options.shape_override {
        graph.override_shape(tensor, shape.clone());
    }
    for input in &options.inputs_as_nchw {
        feed_as_nchw(&mut graph, input)?;
    }

    debug!(
        "imported {} nodes, {} inputs, {} outputs",
        graph.node_count(),
        graph.inputs().len(),
        graph.outputs().len()
    );
    Ok(graph)
}

fn add_nodes(
    graph: &mut Graph,
    source: &FrozenGraph,
    options: &ConvertOptions,
    visiting: &mut FxHashSet<String>,
) -> ConvertResult<()> {
    for node in &source.nodes {
        let id = graph.add_node(source_to_new(node))?;
        for (i, declared) in node.outputs.iter().enumerate() {
            let tensor = node.output_id(i);
            if !declared.shape.is_unknown() {
                graph.set_shape(&tensor, declared.shape.clone());
            }
            if let Some(dtype) = declared.dtype {
                graph.set_dtype(&tensor, dtype);
            }
        }

        for (attr, function) in &node.subgraphs {
            let body = source.functions.get(function).ok_or_else(|| {
                ConvertError::InvalidGraph(format!(
                    "node {} references unknown function {}",
                    node.name, function
                ))
            })?;
            let sub = import_function(function, body, source, options, visiting)?;
            graph.set_subgraph(id, attr, sub);
        }
    }
    Ok(())
}

fn source_to_new(node: &SourceNode) -> NewNode {
    NewNode::new(node.op.clone())
        .name(node.name.clone())
        .inputs(node.inputs.iter().cloned())
        .num_outputs(node.outputs.len())
        .attrs(node.attrs.clone())
        .source()
}

/// Import a function as a nested graph whose formal inputs have no producer
fn import_function(
    name: &str,
    function: &FrozenFunction,
    outer: &FrozenGraph,
    options: &ConvertOptions,
    visiting: &mut FxHashSet<String>,
) -> ConvertResult<Graph> {
    if !visiting.insert(name.to_string()) {
        return Err(ConvertError::InvalidGraph(format!(
            "function {} references itself",
            name
        )));
    }

    let mut sub = Graph::with_name(name, options.opset);
    sub.set_targets(options.targets.clone());
    // nested functions may reference siblings of the enclosing graph
    let mut scope = function.graph.clone();
    for (fname, f) in &outer.functions {
        scope.functions.entry(fname.clone()).or_insert_with(|| f.clone());
    }
    add_nodes(&mut sub, &scope, options, visiting)?;
    sub.set_inputs(function.inputs.clone());
    sub.set_outputs(function.outputs.clone());

    visiting.remove(name);
    Ok(sub)
}

/// Resolve `PlaceholderWithDefault` nodes named in the options
fn apply_defaults(graph: &mut Graph, options: &ConvertOptions) -> ConvertResult<()> {
    for name in &options.ignore_default {
        let tensor = placeholder_output(graph, name)?;
        graph.add_input(tensor);
    }
    for name in &options.use_default {
        let tensor = placeholder_output(graph, name)?;
        graph.remove_input(&tensor);
    }
    Ok(())
}

fn placeholder_output(graph: &Graph, name: &str) -> ConvertResult<String> {
    let id = graph
        .node_id(name)
        .filter(|&id| graph.node(id).is_some_and(|n| n.is_op("PlaceholderWithDefault")))
        .ok_or_else(|| {
            ConvertError::InvalidGraph(format!("{} is not a PlaceholderWithDefault", name))
        })?;
    Ok(graph.output_of(id, 0))
}

/// Take `input` in NCHW layout and transpose it back for its readers
fn feed_as_nchw(graph: &mut Graph, input: &str) -> ConvertResult<()> {
    if !graph.is_graph_input(input) {
        return Err(ConvertError::InvalidGraph(format!(
            "{} is not a designated input",
            input
        )));
    }
    let nhwc = graph.get_shape(input);
    let readers = graph.find_output_consumers(input);

    let name = graph.unique_name(&format!("{}/nchw_to_nhwc", input));
    let id = graph.add_node(
        NewNode::new("Transpose")
            .name(name)
            .input(input)
            .attr("perm", NCHW_TO_NHWC.to_vec())
            .shapes(vec![nhwc.clone()]),
    )?;
    let transposed = graph.output_of(id, 0);
    for reader in readers {
        graph.replace_input(reader, input, &transposed);
    }
    if graph.is_graph_output(input) {
        graph.replace_graph_output(input, &transposed);
    }

    if let Some(&[n, h, w, c]) = nhwc.dims() {
        graph.override_shape(input, Shape::known(vec![n, c, h, w]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tensor_proto::DataType;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn make_source() -> FrozenGraph {
        let mut source = FrozenGraph::new();
        source
            .push(SourceNode::new("x", "Placeholder").output(vec![1, 8, 8, 3], DataType::Float))
            .push(
                SourceNode::new("relu", "Relu")
                    .input("x:0")
                    .output(vec![1, 8, 8, 3], DataType::Float),
            );
        source
    }

    #[test]
    fn test_import_declares_facts() {
        let options = ConvertOptions::default();
        let graph = import_graph(&make_source(), &names(&["x:0"]), &names(&["relu:0"]), &options).unwrap();

        assert_eq!(graph.node_count(), 2);
        assert!(!graph.node_by_name("relu").unwrap().is_converted());
        assert_eq!(graph.get_shape("relu:0"), Shape::known(vec![1, 8, 8, 3]));
        assert_eq!(graph.get_dtype("x:0"), Some(DataType::Float));
        assert_eq!(graph.inputs(), &["x:0".to_string()]);
    }

    #[test]
    fn test_missing_input_rejected() {
        let options = ConvertOptions::default();
        let err = import_graph(&make_source(), &names(&["nope:0"]), &names(&["relu:0"]), &options).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidGraph(_)));
    }

    #[test]
    fn test_input_as_nchw() {
        let options = ConvertOptions::default().input_as_nchw("x:0");
        let graph = import_graph(&make_source(), &names(&["x:0"]), &names(&["relu:0"]), &options).unwrap();

        assert_eq!(graph.get_shape("x:0"), Shape::known(vec![1, 3, 8, 8]));
        let relu_in = graph.node_by_name("relu").unwrap().inputs()[0].clone();
        let transpose = graph.producer_node(&relu_in).unwrap();
        assert_eq!(transpose.op_type(), "Transpose");
        assert_eq!(transpose.get_ints("perm").unwrap(), vec![0, 2, 3, 1]);
        assert_eq!(graph.get_shape(&relu_in), Shape::known(vec![1, 8, 8, 3]));
    }

    #[test]
    fn test_defaults_honored() {
        let mut source = FrozenGraph::new();
        source
            .push(SourceNode::new("d", "Const").untyped_output())
            .push(SourceNode::new("p", "PlaceholderWithDefault").input("d:0").untyped_output())
            .push(SourceNode::new("q", "PlaceholderWithDefault").input("d:0").untyped_output());

        let options = ConvertOptions::default().ignore_default("p").use_default("q");
        let graph = import_graph(&source, &names(&["q:0"]), &names(&["p:0", "q:0"]), &options).unwrap();
        assert!(graph.is_graph_input("p:0"));
        assert!(!graph.is_graph_input("q:0"));
    }

    #[test]
    fn test_function_becomes_nested_graph() {
        let mut body = FrozenGraph::new();
        body.push(SourceNode::new("neg", "Neg").input("v").untyped_output());
        let function = FrozenFunction {
            graph: body,
            inputs: names(&["v"]),
            outputs: names(&["neg:0"]),
        };

        let mut source = make_source();
        source.add_function("body_fn", function);
        source.push(
            SourceNode::new("loop", "While")
                .input("relu:0")
                .subgraph("body", "body_fn")
                .untyped_output(),
        );

        let graph = import_graph(&source, &names(&["x:0"]), &names(&["loop:0"]), &ConvertOptions::default()).unwrap();
        let body = graph.node_by_name("loop").unwrap().get_graph("body").unwrap();
        assert_eq!(body.inputs(), &["v".to_string()]);
        assert!(body.producer("v").is_none());
        assert_eq!(body.node_count(), 1);
    }

    #[test]
    fn test_self_referencing_function_rejected() {
        let mut body = FrozenGraph::new();
        body.push(SourceNode::new("inner", "While").subgraph("body", "f"));
        let mut source = FrozenGraph::new();
        source.add_function(
            "f",
            FrozenFunction {
                graph: body,
                ..Default::default()
            },
        );
        source.push(SourceNode::new("outer", "While").subgraph("body", "f"));

        let err = import_graph(&source, &[], &[], &ConvertOptions::default()).unwrap_err();
        assert!(err.to_string().contains("references itself"));
    }
}
