//! Op kind groupings used by the optimizer passes

/// Two stacked transposes (for merging)
pub const TRANSPOSE_PAIR: &[&str] = &["Transpose", "Transpose"];

/// Ops that forward their single input unchanged
pub const IDENTITY_LIKE: &[&str] = &["Identity"];

/// Elementwise ops taking one tensor, safe to move a transpose across
pub const UNARY_ELEMENTWISE: &[&str] = &[
    "Relu",
    "Sigmoid",
    "Tanh",
    "Neg",
    "Abs",
    "Exp",
    "Log",
    "Sqrt",
    "Floor",
    "Ceil",
    "Reciprocal",
    "Erf",
    "Cast",
];

/// Elementwise binary ops with numpy broadcasting
pub const BROADCAST_OPS: &[&str] = &["Add", "Sub", "Mul", "Div", "Pow", "Max", "Min"];

/// Ops the constant folder knows how to evaluate
pub const FOLDABLE: &[&str] = &[
    "Add",
    "Sub",
    "Mul",
    "Div",
    "Neg",
    "Abs",
    "Sqrt",
    "Relu",
    "Reciprocal",
    "Cast",
    "Transpose",
    "Reshape",
    "Unsqueeze",
    "Squeeze",
    "Concat",
    "Shape",
    "Identity",
    "Gather",
];

/// Check if op can be evaluated at conversion time
pub fn is_foldable(op_type: &str) -> bool {
    FOLDABLE.contains(&op_type)
}
