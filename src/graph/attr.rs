//! Node attribute values
//!
//! Attributes form a closed tagged union. Typed accessors on [`Node`](super::Node)
//! fail with `MissingAttribute` or `InvalidAttribute` instead of returning
//! defaults silently.

use crate::proto::tensor_proto::DataType;
use crate::tensor::TensorValue;

use super::Graph;

/// Attribute value
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Single integer
    Int(i64),
    /// Single float
    Float(f32),
    /// UTF-8 string
    String(String),
    /// Element type
    Type(DataType),
    /// Constant tensor
    Tensor(TensorValue),
    /// Integer list
    Ints(Vec<i64>),
    /// Float list
    Floats(Vec<f32>),
    /// String list
    Strings(Vec<String>),
    /// Nested graph (loop bodies and conditions)
    Graph(Box<Graph>),
}

impl AttrValue {
    /// Kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::String(_) => "string",
            AttrValue::Type(_) => "type",
            AttrValue::Tensor(_) => "tensor",
            AttrValue::Ints(_) => "ints",
            AttrValue::Floats(_) => "floats",
            AttrValue::Strings(_) => "strings",
            AttrValue::Graph(_) => "graph",
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

impl From<DataType> for AttrValue {
    fn from(v: DataType) -> Self {
        AttrValue::Type(v)
    }
}

impl From<TensorValue> for AttrValue {
    fn from(v: TensorValue) -> Self {
        AttrValue::Tensor(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<Vec<f32>> for AttrValue {
    fn from(v: Vec<f32>) -> Self {
        AttrValue::Floats(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::Strings(v)
    }
}

impl From<Graph> for AttrValue {
    fn from(v: Graph) -> Self {
        AttrValue::Graph(Box::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(AttrValue::from(3i64).kind(), "int");
        assert_eq!(AttrValue::from(vec![1i64, 2]).kind(), "ints");
        assert_eq!(AttrValue::from("NHWC").kind(), "string");
        assert_eq!(AttrValue::from(DataType::Float).kind(), "type");
    }
}
