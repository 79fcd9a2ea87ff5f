//! ONNX data type mappings
//!
//! The graph uses the ONNX element type codes directly; these helpers map
//! them to sizes, names and categories.

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;

/// Size in bytes for each fixed-width ONNX data type
pub fn dtype_size(dtype: DataType) -> ConvertResult<usize> {
    match dtype {
        DataType::Float => Ok(4),
        DataType::Uint8 => Ok(1),
        DataType::Int8 => Ok(1),
        DataType::Uint16 => Ok(2),
        DataType::Int16 => Ok(2),
        DataType::Int32 => Ok(4),
        DataType::Int64 => Ok(8),
        DataType::Bool => Ok(1),
        DataType::Float16 => Ok(2),
        DataType::Double => Ok(8),
        DataType::Uint32 => Ok(4),
        DataType::Uint64 => Ok(8),
        DataType::Bfloat16 => Ok(2),
        other => Err(ConvertError::InvalidDataType(format!(
            "{} has no fixed element size",
            dtype_name(other)
        ))),
    }
}

/// Convert i32 to DataType enum
pub fn i32_to_dtype(value: i32) -> ConvertResult<DataType> {
    DataType::try_from(value)
        .map_err(|_| ConvertError::InvalidDataType(format!("unknown element type code {}", value)))
}

/// Lowercase name used in diagnostics
pub fn dtype_name(dtype: DataType) -> &'static str {
    match dtype {
        DataType::Undefined => "undefined",
        DataType::Float => "float32",
        DataType::Uint8 => "uint8",
        DataType::Int8 => "int8",
        DataType::Uint16 => "uint16",
        DataType::Int16 => "int16",
        DataType::Int32 => "int32",
        DataType::Int64 => "int64",
        DataType::String => "string",
        DataType::Bool => "bool",
        DataType::Float16 => "float16",
        DataType::Double => "float64",
        DataType::Uint32 => "uint32",
        DataType::Uint64 => "uint64",
        DataType::Complex64 => "complex64",
        DataType::Complex128 => "complex128",
        DataType::Bfloat16 => "bfloat16",
    }
}

/// Check if data type is floating point
pub fn is_float_type(dtype: DataType) -> bool {
    matches!(
        dtype,
        DataType::Float | DataType::Double | DataType::Float16 | DataType::Bfloat16
    )
}

/// Check if data type is integer
pub fn is_int_type(dtype: DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::Uint8
            | DataType::Uint16
            | DataType::Uint32
            | DataType::Uint64
    )
}

/// Check if the type can carry a quantized payload
pub fn is_quantized_type(dtype: DataType) -> bool {
    matches!(dtype, DataType::Int8 | DataType::Uint8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size(DataType::Float).unwrap(), 4);
        assert_eq!(dtype_size(DataType::Int64).unwrap(), 8);
        assert_eq!(dtype_size(DataType::Uint8).unwrap(), 1);
        assert!(dtype_size(DataType::String).is_err());
    }

    #[test]
    fn test_i32_to_dtype() {
        assert_eq!(i32_to_dtype(1).unwrap(), DataType::Float);
        assert_eq!(i32_to_dtype(7).unwrap(), DataType::Int64);
        assert!(i32_to_dtype(999).is_err());
    }

    #[test]
    fn test_categories() {
        assert!(is_float_type(DataType::Double));
        assert!(!is_float_type(DataType::Int32));
        assert!(is_int_type(DataType::Uint8));
        assert!(is_quantized_type(DataType::Int8));
        assert!(!is_quantized_type(DataType::Int32));
        assert_eq!(dtype_name(DataType::Float), "float32");
    }
}
