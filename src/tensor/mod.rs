//! Tensor utilities
//!
//! This module provides the value-level building blocks of the graph model:
//! - Data type mappings (`dtype`)
//! - Shapes with unknown rank and unknown dims (`shape`)
//! - Constant tensor values (`value`)
//! - Conversion between values, ndarray and TensorProto (`convert`)
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::tensor::{value_to_array_f32, array_to_value_f32, TensorValue};
//!
//! let value = TensorValue::vec_f32(vec![1.0, 2.0]);
//! let array = value_to_array_f32(&value)?;
//! let doubled = array_to_value_f32(&array.mapv(|x| x * 2.0))?;
//! ```

pub mod convert;
pub mod dtype;
pub mod shape;
pub mod value;

// Re-export commonly used items
pub use crate::proto::tensor_proto::DataType;
pub use convert::{
    array_to_value_f32, from_ndarray, proto_to_value, to_ndarray, transpose_value, value_to_array_f32,
    value_to_proto,
};
pub use dtype::{dtype_name, dtype_size, i32_to_dtype, is_float_type, is_int_type};
pub use shape::{broadcast_dims, normalize_axes, normalize_axis, numel, Shape, UNKNOWN_DIM};
pub use value::{TensorData, TensorValue};
pub(crate) use value::map_tensor_data;
