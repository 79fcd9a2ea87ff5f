//! Structural checks on an assembled model
//!
//! Catches dangling references before the model leaves the converter. Nested
//! graphs are checked with the enclosing scope visible, since loop bodies may
//! read outer tensors directly.

use rustc_hash::FxHashSet;

use crate::error::{ConvertError, ConvertResult};
use crate::opset::validate_opset;
use crate::proto::{GraphProto, ModelProto};

/// Validation result with detailed issues
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the model is valid
    pub is_valid: bool,
    /// Critical issues
    pub errors: Vec<String>,
    /// Non-critical issues
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.is_valid = false;
    }

    /// Add a warning
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merge with another result
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.is_valid {
            self.is_valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validate a model: opset imports, then the graph tree
pub fn validate_model(model: &ModelProto) -> ValidationResult {
    let mut result = ValidationResult::valid();

    match model.opset_version_for("") {
        Some(version) => {
            if let Err(e) = validate_opset(version) {
                result.add_error(e.to_string());
            }
        }
        None => result.add_error("No import of the default domain"),
    }

    match &model.graph {
        Some(graph) => result.merge(validate_graph(graph)),
        None => result.add_error("Model does not contain a graph"),
    }

    result
}

/// Validate a top-level graph
pub fn validate_graph(graph: &GraphProto) -> ValidationResult {
    validate_scoped(graph, &FxHashSet::default())
}

fn validate_scoped(graph: &GraphProto, outer: &FxHashSet<String>) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let mut known: FxHashSet<String> = outer.clone();

    for input in &graph.input {
        if input.name.is_empty() {
            result.add_error(format!("Graph '{}' has an input with empty name", graph.name));
        } else {
            known.insert(input.name.clone());
        }
    }
    for init in &graph.initializer {
        if init.name.is_empty() {
            result.add_warning(format!("Graph '{}' has an initializer with empty name", graph.name));
        } else {
            known.insert(init.name.clone());
        }
    }

    let mut produced: FxHashSet<&str> = FxHashSet::default();
    for (idx, node) in graph.node.iter().enumerate() {
        if node.op_type.is_empty() {
            result.add_error(format!("Node {} has empty op_type", idx));
        }

        for input in &node.input {
            if !input.is_empty() && !known.contains(input) {
                result.add_error(format!(
                    "Node '{}' ({}): input '{}' not found",
                    node.name, node.op_type, input
                ));
            }
        }

        for attr in &node.attribute {
            if let Some(body) = &attr.g {
                result.merge(validate_scoped(body, &known));
            }
        }

        for output in &node.output {
            if output.is_empty() {
                continue;
            }
            if !produced.insert(output) {
                result.add_error(format!(
                    "Duplicate output '{}' in node '{}'",
                    output, node.name
                ));
            }
            known.insert(output.clone());
        }
    }

    for output in &graph.output {
        if output.name.is_empty() {
            result.add_error(format!("Graph '{}' has an output with empty name", graph.name));
        } else if !known.contains(&output.name) {
            result.add_error(format!(
                "Graph output '{}' not produced by any node",
                output.name
            ));
        }
    }

    if graph.node.is_empty() && graph.output.is_empty() {
        result.add_warning(format!("Graph '{}' is empty", graph.name));
    }

    result
}

/// Quick validation that fails on the first batch of errors
pub fn check_model(model: &ModelProto) -> ConvertResult<()> {
    let result = validate_model(model);
    if result.is_valid {
        Ok(())
    } else {
        Err(ConvertError::InvalidGraph(result.errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::make_tensor_value_info;
    use crate::proto::{AttributeProto, NodeProto, OperatorSetIdProto};

    fn make_node(op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
        NodeProto {
            op_type: op_type.to_string(),
            name: name.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn make_model(graph: GraphProto) -> ModelProto {
        ModelProto {
            ir_version: 8,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
            graph: Some(graph),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_model() {
        let graph = GraphProto {
            node: vec![make_node("Relu", "relu", &["x"], &["y"])],
            input: vec![make_tensor_value_info("x", 1, Some(&[1]))],
            output: vec![make_tensor_value_info("y", 1, Some(&[1]))],
            ..Default::default()
        };
        assert!(check_model(&make_model(graph)).is_ok());
    }

    #[test]
    fn test_dangling_input() {
        let graph = GraphProto {
            node: vec![make_node("Relu", "relu", &["missing"], &["y"])],
            output: vec![make_tensor_value_info("y", 1, None)],
            ..Default::default()
        };
        let result = validate_model(&make_model(graph));
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("missing"));
    }

    #[test]
    fn test_nested_graph_sees_outer_scope() {
        let body = GraphProto {
            name: "body".to_string(),
            node: vec![make_node("Add", "inner", &["v", "x"], &["w"])],
            input: vec![make_tensor_value_info("v", 1, None)],
            output: vec![make_tensor_value_info("w", 1, None)],
            ..Default::default()
        };
        let mut outer_loop = make_node("Loop", "loop", &["x"], &["y"]);
        outer_loop.attribute.push(AttributeProto::new_graph("body", body));

        let graph = GraphProto {
            node: vec![outer_loop],
            input: vec![make_tensor_value_info("x", 1, None)],
            output: vec![make_tensor_value_info("y", 1, None)],
            ..Default::default()
        };
        let result = validate_model(&make_model(graph));
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn test_unsupported_opset() {
        let mut model = make_model(GraphProto::default());
        model.opset_import[0].version = 99;
        assert!(check_model(&model).is_err());
    }
}
