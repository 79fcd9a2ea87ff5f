//! Model builder for the converted graph
//!
//! Assembles a `ModelProto` from a finished [`Graph`]. Nodes are emitted in
//! topological order, `Const` nodes become initializers, `Placeholder` nodes
//! become graph inputs, and nested graphs recurse through the `Graph`
//! attribute case.

use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashSet;

use crate::error::ConvertResult;
use crate::graph::{AttrValue, Graph, Node};
use crate::opset::{default_domain_version, ir_version_for_opset, OpsetId, DEFAULT_DOMAIN};
use crate::proto::extensions::make_tensor_value_info;
use crate::proto::{AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, ValueInfoProto};
use crate::tensor::{value_to_proto, Shape, TensorValue};

use super::external::ExternalTensorStorage;

/// Producer name written into every model
pub const PRODUCER_NAME: &str = "frozen2onnx";

/// Builder turning a finished graph into a model
#[derive(Debug)]
pub struct ModelBuilder<'g> {
    graph: &'g Graph,
    /// Doc string override
    doc_string: Option<String>,
    /// Final names for designated inputs and outputs
    renames: IndexMap<String, String>,
    /// Externalization threshold, `None` keeps every payload inline
    external_threshold: Option<usize>,
}

impl<'g> ModelBuilder<'g> {
    /// Create a builder over a graph
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            doc_string: None,
            renames: IndexMap::new(),
            external_threshold: None,
        }
    }

    /// Set the doc string
    pub fn doc_string(mut self, doc: impl Into<String>) -> Self {
        self.doc_string = Some(doc.into());
        self
    }

    /// Rename a designated tensor in the emitted model
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Rename several designated tensors
    pub fn renames(mut self, renames: &IndexMap<String, String>) -> Self {
        self.renames
            .extend(renames.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Move payloads larger than `threshold` bytes to external storage
    pub fn external_threshold(mut self, threshold: usize) -> Self {
        self.external_threshold = Some(threshold);
        self
    }

    /// Build the model
    ///
    /// The storage is `Some` only when an external threshold was set.
    pub fn build(self) -> ConvertResult<(ModelProto, Option<ExternalTensorStorage>)> {
        let opset = self.graph.opset();
        let ir_version = ir_version_for_opset(opset);

        let mut graph = graph_to_proto(self.graph)?;
        if ir_version < 4 {
            list_initializers_as_inputs(&mut graph);
        }
        for (old, new) in &self.renames {
            rename_tensor(&mut graph, old, new);
        }

        let storage = match self.external_threshold {
            Some(threshold) => {
                let mut storage = ExternalTensorStorage::new(threshold);
                externalize_graph(&mut graph, &mut storage)?;
                debug!(
                    "externalized {} tensor(s), {} bytes",
                    storage.len(),
                    storage.total_bytes()
                );
                Some(storage)
            }
            None => None,
        };

        let doc_string = self
            .doc_string
            .unwrap_or_else(|| format!("converted from {}", self.graph.name()));

        let model = ModelProto {
            ir_version,
            opset_import: opset_imports(self.graph, &graph),
            producer_name: PRODUCER_NAME.to_string(),
            producer_version: crate::VERSION.to_string(),
            doc_string,
            graph: Some(graph),
            ..Default::default()
        };
        Ok((model, storage))
    }
}

/// Convert a graph and its nested graphs to protos
pub fn graph_to_proto(graph: &Graph) -> ConvertResult<GraphProto> {
    let mut proto = GraphProto {
        name: graph.name().to_string(),
        ..Default::default()
    };
    let mut described: FxHashSet<String> = FxHashSet::default();

    for id in graph.topological_order()? {
        let Some(node) = graph.node(id) else { continue };
        if node.is_op("Placeholder") {
            continue;
        }
        if node.is_op("Const") {
            let output = node.outputs()[0].as_str();
            let value = node.get_tensor("value")?;
            if graph.is_graph_output(output) {
                // outputs cannot be initializers
                proto.node.push(constant_node(node, value));
            } else {
                proto.initializer.push(value_to_proto(value, output));
            }
            described.insert(output.to_string());
            continue;
        }

        proto.node.push(node_to_proto(node)?);
        for output in node.outputs() {
            if graph.is_graph_output(output) || !described.insert(output.clone()) {
                continue;
            }
            if let Some(info) = value_info(graph, output) {
                proto.value_info.push(info);
            }
        }
    }

    proto.input = graph.inputs().iter().map(|t| io_info(graph, t)).collect();
    proto.output = graph.outputs().iter().map(|t| io_info(graph, t)).collect();
    Ok(proto)
}

fn node_to_proto(node: &Node) -> ConvertResult<NodeProto> {
    let attribute = node
        .attrs()
        .map(|(name, value)| attr_to_proto(name, value))
        .collect::<ConvertResult<Vec<_>>>()?;
    Ok(NodeProto {
        input: node.inputs().to_vec(),
        output: node.outputs().to_vec(),
        name: node.name().to_string(),
        op_type: node.op_type().to_string(),
        domain: node.domain().to_string(),
        attribute,
        doc_string: String::new(),
    })
}

fn constant_node(node: &Node, value: &TensorValue) -> NodeProto {
    NodeProto {
        input: Vec::new(),
        output: node.outputs().to_vec(),
        name: node.name().to_string(),
        op_type: "Constant".to_string(),
        domain: String::new(),
        attribute: vec![AttributeProto::new_tensor("value", value_to_proto(value, ""))],
        doc_string: String::new(),
    }
}

/// Convert one attribute, recursing into nested graphs
pub fn attr_to_proto(name: &str, value: &AttrValue) -> ConvertResult<AttributeProto> {
    Ok(match value {
        AttrValue::Int(v) => AttributeProto::new_int(name, *v),
        AttrValue::Float(v) => AttributeProto::new_float(name, *v),
        AttrValue::String(v) => AttributeProto::new_string(name, v.as_bytes()),
        AttrValue::Type(dtype) => AttributeProto::new_int(name, *dtype as i64),
        AttrValue::Tensor(v) => AttributeProto::new_tensor(name, value_to_proto(v, "")),
        AttrValue::Ints(v) => AttributeProto::new_ints(name, v.clone()),
        AttrValue::Floats(v) => AttributeProto::new_floats(name, v.clone()),
        AttrValue::Strings(v) => {
            AttributeProto::new_strings(name, v.iter().map(|s| s.as_bytes().to_vec()).collect())
        }
        AttrValue::Graph(g) => AttributeProto::new_graph(name, graph_to_proto(g)?),
    })
}

fn shape_dims(shape: &Shape) -> Option<&[i64]> {
    shape.dims()
}

/// Designated inputs and outputs always get an entry, even when unknown
fn io_info(graph: &Graph, tensor: &str) -> ValueInfoProto {
    let shape = graph.get_shape(tensor);
    let elem_type = graph.get_dtype(tensor).map_or(0, |d| d as i32);
    make_tensor_value_info(tensor, elem_type, shape_dims(&shape))
}

/// Intermediate tensors are described only when something is known
fn value_info(graph: &Graph, tensor: &str) -> Option<ValueInfoProto> {
    let dtype = graph.get_dtype(tensor);
    let shape = graph.get_shape(tensor);
    if dtype.is_none() && shape.is_unknown() {
        return None;
    }
    let elem_type = dtype.map_or(0, |d| d as i32);
    Some(make_tensor_value_info(tensor, elem_type, shape_dims(&shape)))
}

/// IR 3 requires every initializer to appear among the graph inputs
fn list_initializers_as_inputs(graph: &mut GraphProto) {
    for init in &graph.initializer {
        if graph.input.iter().any(|i| i.name == init.name) {
            continue;
        }
        graph
            .input
            .push(make_tensor_value_info(&init.name, init.data_type, Some(&init.dims)));
    }
}

/// Rename a tensor throughout a graph
///
/// Covers node inputs and outputs, initializers, value info, and the graph
/// signature. Nested graphs see the new name too, since they may read it
/// from the enclosing scope.
pub fn rename_tensor(graph: &mut GraphProto, old_name: &str, new_name: &str) {
    for node in &mut graph.node {
        for name in node.input.iter_mut().chain(node.output.iter_mut()) {
            if name == old_name {
                *name = new_name.to_string();
            }
        }
        for attr in &mut node.attribute {
            if let Some(g) = attr.g.as_mut() {
                rename_tensor(g, old_name, new_name);
            }
        }
    }

    for init in &mut graph.initializer {
        if init.name == old_name {
            init.name = new_name.to_string();
        }
    }

    for info in graph
        .value_info
        .iter_mut()
        .chain(graph.input.iter_mut())
        .chain(graph.output.iter_mut())
    {
        if info.name == old_name {
            info.name = new_name.to_string();
        }
    }
}

fn externalize_graph(graph: &mut GraphProto, storage: &mut ExternalTensorStorage) -> ConvertResult<()> {
    for init in &mut graph.initializer {
        storage.externalize(init)?;
    }
    for node in &mut graph.node {
        for attr in &mut node.attribute {
            if let Some(g) = attr.g.as_mut() {
                externalize_graph(g, storage)?;
            }
        }
    }
    Ok(())
}

/// Default domain, extra imports, then any other domain a node uses
fn opset_imports(graph: &Graph, proto: &GraphProto) -> Vec<OperatorSetIdProto> {
    let mut imports: IndexMap<String, i64> = IndexMap::new();
    imports.insert(DEFAULT_DOMAIN.to_string(), graph.opset());
    for extra in graph.extra_opsets() {
        imports.insert(extra.domain.clone(), extra.version);
    }

    let mut domains = Vec::new();
    collect_domains(proto, &mut domains);
    for domain in domains {
        imports
            .entry(domain.clone())
            .or_insert_with(|| default_domain_version(&domain));
    }

    imports
        .into_iter()
        .map(|(domain, version)| OpsetId::new(domain, version).to_proto())
        .collect()
}

fn collect_domains(graph: &GraphProto, domains: &mut Vec<String>) {
    for node in &graph.node {
        if !node.domain.is_empty() && !domains.contains(&node.domain) {
            domains.push(node.domain.clone());
        }
        for attr in &node.attribute {
            if let Some(g) = &attr.g {
                collect_domains(g, domains);
            }
        }
    }
}
