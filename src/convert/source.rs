//! Source-side input types
//!
//! A [`FrozenGraph`] is the already-acquired source graph: every variable
//! folded into a constant, every node a typed tensor operation. Output
//! tensors of a node are addressed as `"{name}:{index}"`.

use indexmap::IndexMap;

use crate::graph::{AttrMap, AttrValue};
use crate::proto::tensor_proto::DataType;
use crate::tensor::Shape;

/// Facts declared for one source output tensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTensor {
    /// Declared shape, possibly partial
    pub shape: Shape,
    /// Declared element type
    pub dtype: Option<DataType>,
}

impl SourceTensor {
    /// Tensor with a shape and type
    pub fn new(shape: impl Into<Shape>, dtype: DataType) -> Self {
        Self {
            shape: shape.into(),
            dtype: Some(dtype),
        }
    }
}

/// One operation of the source graph
#[derive(Debug, Clone, Default)]
pub struct SourceNode {
    /// Unique node name
    pub name: String,
    /// Source op kind
    pub op: String,
    /// Input tensor ids, `"{producer}:{index}"`
    pub inputs: Vec<String>,
    /// Attributes
    pub attrs: AttrMap,
    /// Declared facts for each output
    pub outputs: Vec<SourceTensor>,
    /// Attribute name → function name for nested graphs (loop cond/body)
    pub subgraphs: IndexMap<String, String>,
}

impl SourceNode {
    /// Create a node with no inputs or outputs
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            ..Default::default()
        }
    }

    /// Append an input tensor id
    pub fn input(mut self, tensor: impl Into<String>) -> Self {
        self.inputs.push(tensor.into());
        self
    }

    /// Append several input tensor ids
    pub fn inputs<I, S>(mut self, tensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(tensors.into_iter().map(Into::into));
        self
    }

    /// Set an attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Append a declared output
    pub fn output(mut self, shape: impl Into<Shape>, dtype: DataType) -> Self {
        self.outputs.push(SourceTensor::new(shape, dtype));
        self
    }

    /// Append an output with nothing declared
    pub fn untyped_output(mut self) -> Self {
        self.outputs.push(SourceTensor::default());
        self
    }

    /// Reference a function of the enclosing [`FrozenGraph`] as a nested graph
    pub fn subgraph(mut self, attr: impl Into<String>, function: impl Into<String>) -> Self {
        self.subgraphs.insert(attr.into(), function.into());
        self
    }

    /// Id of the output at `idx`
    pub fn output_id(&self, idx: usize) -> String {
        format!("{}:{}", self.name, idx)
    }
}

/// A nested graph referenced by name (loop condition or body)
#[derive(Debug, Clone, Default)]
pub struct FrozenFunction {
    /// The function's nodes
    pub graph: FrozenGraph,
    /// Formal input tensor ids, bound positionally
    pub inputs: Vec<String>,
    /// Result tensor ids
    pub outputs: Vec<String>,
}

/// Frozen source graph
#[derive(Debug, Clone, Default)]
pub struct FrozenGraph {
    /// Nodes in any order
    pub nodes: Vec<SourceNode>,
    /// Named nested graphs
    pub functions: IndexMap<String, FrozenFunction>,
}

impl FrozenGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node
    pub fn push(&mut self, node: SourceNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Register a nested graph
    pub fn add_function(&mut self, name: impl Into<String>, function: FrozenFunction) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Find a node by name
    pub fn node(&self, name: &str) -> Option<&SourceNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Contents of one initialized hash table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableEntry {
    /// String keys
    pub keys: Vec<String>,
    /// Integer value per key
    pub values: Vec<i64>,
}

impl TableEntry {
    /// Build from parallel key and value lists
    pub fn new(keys: Vec<String>, values: Vec<i64>) -> Self {
        Self { keys, values }
    }

    /// Value for a key
    pub fn lookup(&self, key: &str) -> Option<i64> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i).copied())
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the table has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Side data: initialized tables keyed by shared name
#[derive(Debug, Clone, Default)]
pub struct InitializedTables {
    tables: IndexMap<String, TableEntry>,
}

impl InitializedTables {
    /// No tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table
    pub fn insert(&mut self, shared_name: impl Into<String>, entry: TableEntry) {
        self.tables.insert(shared_name.into(), entry);
    }

    /// Table by shared name
    pub fn get(&self, shared_name: &str) -> Option<&TableEntry> {
        self.tables.get(shared_name)
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether there are no tables
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, TableEntry)> for InitializedTables {
    fn from_iter<I: IntoIterator<Item = (K, TableEntry)>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
