//! Graph nodes
//!
//! A [`Node`] owns its attributes, but its input and output lists can only be
//! changed through [`Graph`](super::Graph) mutators so the producer and
//! consumer maps stay coherent.

use indexmap::IndexMap;

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{Shape, TensorValue};

use super::attr::AttrValue;
use super::Graph;

/// Ordered attribute map
pub type AttrMap = IndexMap<String, AttrValue>;

/// One operation in a graph
#[derive(Debug, Clone)]
pub struct Node {
    pub(super) name: String,
    pub(super) op_type: String,
    pub(super) domain: String,
    pub(super) inputs: Vec<String>,
    pub(super) outputs: Vec<String>,
    pub(super) attrs: AttrMap,
    pub(super) converted: bool,
}

macro_rules! typed_attr {
    ($get:ident, $get_or:ident, $variant:ident, $ret:ty, $expected:literal, |$v:ident| $conv:expr) => {
        #[doc = concat!("Get a required ", $expected, " attribute")]
        pub fn $get(&self, name: &str) -> ConvertResult<$ret> {
            match self.attrs.get(name) {
                Some(AttrValue::$variant($v)) => Ok($conv),
                Some(other) => Err(self.wrong_kind(name, $expected, other)),
                None => Err(ConvertError::MissingAttribute {
                    node: self.name.clone(),
                    attr: name.to_string(),
                }),
            }
        }

        #[doc = concat!("Get an optional ", $expected, " attribute with a default")]
        pub fn $get_or(&self, name: &str, default: $ret) -> ConvertResult<$ret> {
            match self.attrs.get(name) {
                Some(AttrValue::$variant($v)) => Ok($conv),
                Some(other) => Err(self.wrong_kind(name, $expected, other)),
                None => Ok(default),
            }
        }
    };
}

impl Node {
    /// Unique node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Op kind
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Check if this node has a specific op type
    pub fn is_op(&self, op_type: &str) -> bool {
        self.op_type == op_type
    }

    /// Change the op kind in place
    pub fn set_op_type(&mut self, op_type: impl Into<String>) {
        self.op_type = op_type.into();
    }

    /// Domain tag, empty for the default domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Set the domain tag
    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
    }

    /// Ordered input tensor ids, empty string for an omitted optional input
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Ordered output tensor ids
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Input tensor id at `idx`
    pub fn input(&self, idx: usize) -> Option<&str> {
        self.inputs.get(idx).map(String::as_str)
    }

    /// Output tensor id at `idx`
    pub fn output(&self, idx: usize) -> Option<&str> {
        self.outputs.get(idx).map(String::as_str)
    }

    /// Whether the node is already in target form
    pub fn is_converted(&self) -> bool {
        self.converted
    }

    /// Mark the node as target form
    pub fn set_converted(&mut self, converted: bool) {
        self.converted = converted;
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Raw attribute lookup
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Mutable attribute lookup
    pub fn attr_mut(&mut self, name: &str) -> Option<&mut AttrValue> {
        self.attrs.get_mut(name)
    }

    /// Check if node has attribute
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Iterate attributes in insertion order
    pub fn attrs(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.attrs.iter()
    }

    /// Set or update an attribute
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    /// Remove an attribute by name
    pub fn remove_attr(&mut self, name: &str) -> Option<AttrValue> {
        self.attrs.shift_remove(name)
    }

    /// Drop every attribute not in `keep`
    pub fn retain_attrs(&mut self, keep: &[&str]) {
        self.attrs.retain(|k, _| keep.contains(&k.as_str()));
    }

    fn wrong_kind(&self, name: &str, expected: &'static str, found: &AttrValue) -> ConvertError {
        ConvertError::InvalidAttribute {
            node: self.name.clone(),
            attr: name.to_string(),
            expected,
            found: found.kind(),
        }
    }

    typed_attr!(get_int, get_int_or, Int, i64, "int", |v| *v);
    typed_attr!(get_float, get_float_or, Float, f32, "float", |v| *v);
    typed_attr!(get_type, get_type_or, Type, DataType, "type", |v| *v);
    typed_attr!(get_string, get_string_or, String, String, "string", |v| v.clone());
    typed_attr!(get_ints, get_ints_or, Ints, Vec<i64>, "ints", |v| v.clone());
    typed_attr!(get_floats, get_floats_or, Floats, Vec<f32>, "floats", |v| v.clone());
    typed_attr!(get_strings, get_strings_or, Strings, Vec<String>, "strings", |v| v.clone());

    /// Get an optional boolean flag stored as an int
    pub fn get_bool_or(&self, name: &str, default: bool) -> ConvertResult<bool> {
        Ok(self.get_int_or(name, default as i64)? != 0)
    }

    /// Get a required tensor attribute
    pub fn get_tensor(&self, name: &str) -> ConvertResult<&TensorValue> {
        match self.attrs.get(name) {
            Some(AttrValue::Tensor(v)) => Ok(v),
            Some(other) => Err(self.wrong_kind(name, "tensor", other)),
            None => Err(ConvertError::MissingAttribute {
                node: self.name.clone(),
                attr: name.to_string(),
            }),
        }
    }

    /// Get a required nested graph attribute
    pub fn get_graph(&self, name: &str) -> ConvertResult<&Graph> {
        match self.attrs.get(name) {
            Some(AttrValue::Graph(g)) => Ok(g),
            Some(other) => Err(self.wrong_kind(name, "graph", other)),
            None => Err(ConvertError::MissingAttribute {
                node: self.name.clone(),
                attr: name.to_string(),
            }),
        }
    }

    /// Names of attributes holding nested graphs
    pub fn subgraph_attrs(&self) -> Vec<String> {
        self.attrs
            .iter()
            .filter(|(_, v)| matches!(v, AttrValue::Graph(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Description of a node to insert with [`Graph::add_node`](super::Graph::add_node)
///
/// Unset names are generated from the op kind; unset outputs become
/// `"{name}:{i}"`. Nodes are created in target form unless [`NewNode::source`]
/// is called.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub(super) op_type: String,
    pub(super) name: Option<String>,
    pub(super) domain: String,
    pub(super) inputs: Vec<String>,
    pub(super) outputs: Option<Vec<String>>,
    pub(super) num_outputs: usize,
    pub(super) attrs: AttrMap,
    pub(super) converted: bool,
    pub(super) shapes: Vec<Shape>,
    pub(super) dtypes: Vec<DataType>,
}

impl NewNode {
    /// Start a node of the given op kind
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            domain: String::new(),
            inputs: Vec::new(),
            outputs: None,
            num_outputs: 1,
            attrs: AttrMap::new(),
            converted: true,
            shapes: Vec::new(),
            dtypes: Vec::new(),
        }
    }

    /// Fixed node name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Domain tag
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Append one input
    pub fn input(mut self, tensor: impl Into<String>) -> Self {
        self.inputs.push(tensor.into());
        self
    }

    /// Replace the input list
    pub fn inputs<I, S>(mut self, tensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = tensors.into_iter().map(Into::into).collect();
        self
    }

    /// Fixed output tensor ids
    pub fn outputs<I, S>(mut self, tensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(tensors.into_iter().map(Into::into).collect());
        self
    }

    /// Number of generated outputs
    pub fn num_outputs(mut self, n: usize) -> Self {
        self.num_outputs = n;
        self
    }

    /// Add an attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Replace all attributes
    pub fn attrs(mut self, attrs: AttrMap) -> Self {
        self.attrs = attrs;
        self
    }

    /// Mark as a source-form node awaiting conversion
    pub fn source(mut self) -> Self {
        self.converted = false;
        self
    }

    /// Known output shapes, by output position
    pub fn shapes(mut self, shapes: Vec<Shape>) -> Self {
        self.shapes = shapes;
        self
    }

    /// Known output dtypes, by output position
    pub fn dtypes(mut self, dtypes: Vec<DataType>) -> Self {
        self.dtypes = dtypes;
        self
    }
}
