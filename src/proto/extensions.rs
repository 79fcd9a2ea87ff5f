//! Extension methods for ONNX protobuf types
//!
//! Provides convenient helper methods for working with ONNX protobuf types.

use super::onnx::*;

// ============================================================================
// ModelProto extensions
// ============================================================================

impl ModelProto {
    /// Get the opset version for the default domain
    pub fn get_opset_version(&self) -> Option<i64> {
        self.opset_version_for(crate::opset::DEFAULT_DOMAIN)
    }

    /// Get the opset version imported for a domain
    pub fn opset_version_for(&self, domain: &str) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| op.domain == domain)
            .map(|op| op.version)
    }

    /// Get mutable reference to graph, creating if necessary
    pub fn graph_mut(&mut self) -> &mut GraphProto {
        self.graph.get_or_insert_with(GraphProto::default)
    }
}

// ============================================================================
// GraphProto extensions
// ============================================================================

impl GraphProto {
    /// Find a node by name
    pub fn find_node(&self, name: &str) -> Option<&NodeProto> {
        self.node.iter().find(|n| n.name == name)
    }

    /// Find an initializer by name
    pub fn find_initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializer.iter().find(|t| t.name == name)
    }

    /// Count nodes with the given op type
    pub fn count_op(&self, op_type: &str) -> usize {
        self.node.iter().filter(|n| n.op_type == op_type).count()
    }
}

// ============================================================================
// NodeProto extensions
// ============================================================================

impl NodeProto {
    /// Get attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|attr| attr.name == name)
    }

    /// Get integer attribute value with default
    pub fn get_attribute_int(&self, name: &str, default: i64) -> i64 {
        self.get_attribute(name).map(|a| a.i).unwrap_or(default)
    }

    /// Get repeated int attribute
    pub fn get_attribute_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_attribute(name).map(|a| a.ints.as_slice())
    }

    /// Check if this node has a specific op type
    pub fn is_op_type(&self, op_type: &str) -> bool {
        self.op_type == op_type
    }
}

// ============================================================================
// ValueInfoProto extensions
// ============================================================================

impl ValueInfoProto {
    /// Get the shape dimensions if available, -1 for symbolic dims
    pub fn get_shape(&self) -> Option<Vec<i64>> {
        match self.r#type.as_ref()?.value.as_ref()? {
            type_proto::Value::TensorType(tensor) => tensor.shape.as_ref().map(|s| {
                s.dim
                    .iter()
                    .map(|d| match &d.value {
                        Some(tensor_shape_proto::dimension::Value::DimValue(v)) => *v,
                        Some(tensor_shape_proto::dimension::Value::DimParam(_)) => -1,
                        None => -1,
                    })
                    .collect()
            }),
        }
    }

    /// Get the element type if this is a tensor type
    pub fn get_elem_type(&self) -> Option<i32> {
        match self.r#type.as_ref()?.value.as_ref()? {
            type_proto::Value::TensorType(tensor) => Some(tensor.elem_type),
        }
    }
}

// ============================================================================
// TensorProto extensions
// ============================================================================

impl TensorProto {
    /// Get the total number of elements
    pub fn num_elements(&self) -> usize {
        self.dims.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Check if this tensor has raw_data
    pub fn has_raw_data(&self) -> bool {
        !self.raw_data.is_empty()
    }

    /// Check if the payload is stored outside the model
    pub fn is_external(&self) -> bool {
        self.data_location == tensor_proto::DataLocation::External as i32
    }

    /// Look up an external data entry
    pub fn external_entry(&self, key: &str) -> Option<&str> {
        self.external_data
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

// ============================================================================
// AttributeProto extensions
// ============================================================================

impl AttributeProto {
    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            i: value,
            r#type: attribute_proto::AttributeType::Int as i32,
            ..Default::default()
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            f: value,
            r#type: attribute_proto::AttributeType::Float as i32,
            ..Default::default()
        }
    }

    /// Create a new string attribute
    pub fn new_string(name: &str, value: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            s: value.to_vec(),
            r#type: attribute_proto::AttributeType::String as i32,
            ..Default::default()
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            ints: values,
            r#type: attribute_proto::AttributeType::Ints as i32,
            ..Default::default()
        }
    }

    /// Create a new floats attribute
    pub fn new_floats(name: &str, values: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            floats: values,
            r#type: attribute_proto::AttributeType::Floats as i32,
            ..Default::default()
        }
    }

    /// Create a new strings attribute
    pub fn new_strings(name: &str, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            strings: values,
            r#type: attribute_proto::AttributeType::Strings as i32,
            ..Default::default()
        }
    }

    /// Create a new tensor attribute
    pub fn new_tensor(name: &str, value: TensorProto) -> Self {
        Self {
            name: name.to_string(),
            t: Some(value),
            r#type: attribute_proto::AttributeType::Tensor as i32,
            ..Default::default()
        }
    }

    /// Create a new graph attribute
    pub fn new_graph(name: &str, value: GraphProto) -> Self {
        Self {
            name: name.to_string(),
            g: Some(value),
            r#type: attribute_proto::AttributeType::Graph as i32,
            ..Default::default()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor
///
/// `None` leaves the shape unset (unknown rank); negative dims become
/// unnamed symbolic dimensions.
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: Option<&[i64]>) -> ValueInfoProto {
    let shape = shape.map(|dims| TensorShapeProto {
        dim: dims
            .iter()
            .map(|&d| tensor_shape_proto::Dimension {
                value: (d >= 0).then_some(tensor_shape_proto::dimension::Value::DimValue(d)),
                denotation: String::new(),
            })
            .collect(),
    });

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor { elem_type, shape })),
            denotation: String::new(),
        }),
        doc_string: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_get_attribute() {
        let mut node = NodeProto::default();
        node.attribute.push(AttributeProto::new_int("axis", 1));

        assert_eq!(node.get_attribute_int("axis", 0), 1);
        assert_eq!(node.get_attribute_int("missing", 99), 99);
    }

    #[test]
    fn test_make_tensor_value_info() {
        let vi = make_tensor_value_info("test", 1, Some(&[1, 3, 224, 224]));
        assert_eq!(vi.name, "test");
        assert_eq!(vi.get_shape(), Some(vec![1, 3, 224, 224]));
        assert_eq!(vi.get_elem_type(), Some(1));
    }

    #[test]
    fn test_value_info_unknown_dims() {
        let vi = make_tensor_value_info("x", 1, Some(&[-1, 3]));
        assert_eq!(vi.get_shape(), Some(vec![-1, 3]));

        let vi = make_tensor_value_info("y", 1, None);
        assert_eq!(vi.get_shape(), None);
    }

    #[test]
    fn test_external_entry() {
        let tensor = TensorProto {
            data_location: tensor_proto::DataLocation::External as i32,
            external_data: vec![StringStringEntryProto {
                key: "location".to_string(),
                value: "w".to_string(),
            }],
            ..Default::default()
        };
        assert!(tensor.is_external());
        assert_eq!(tensor.external_entry("location"), Some("w"));
        assert_eq!(tensor.external_entry("offset"), None);
    }
}
