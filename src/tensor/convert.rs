//! Tensor conversion utilities
//!
//! Convert between [`TensorValue`], ndarray arrays and ONNX `TensorProto`.

use ndarray::{ArrayD, IxDyn};

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;
use crate::proto::TensorProto;

use super::dtype::{dtype_name, dtype_size, i32_to_dtype};
use super::shape::numel;
use super::value::{map_tensor_data, TensorData, TensorValue};

/// Build an ndarray view of row-major data
pub fn to_ndarray<T: Clone>(dims: &[i64], data: &[T]) -> ConvertResult<ArrayD<T>> {
    let shape: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
        .map_err(|e| ConvertError::Internal(e.to_string()))
}

/// Flatten an ndarray back to dims and row-major data
pub fn from_ndarray<T: Clone>(array: &ArrayD<T>) -> (Vec<i64>, Vec<T>) {
    let dims = array.shape().iter().map(|&d| d as i64).collect();
    (dims, array.iter().cloned().collect())
}

/// Convert an f32 tensor into an ndarray
pub fn value_to_array_f32(value: &TensorValue) -> ConvertResult<ArrayD<f32>> {
    let data = value.as_f32s().ok_or_else(|| {
        ConvertError::InvalidDataType(format!("{} is not numeric", dtype_name(value.dtype())))
    })?;
    to_ndarray(value.dims(), &data)
}

/// Create a float32 tensor from an ndarray
pub fn array_to_value_f32(array: &ArrayD<f32>) -> ConvertResult<TensorValue> {
    let (dims, data) = from_ndarray(array);
    TensorValue::new(dims, TensorData::Float(data))
}

/// Permute the axes of any value
pub fn transpose_value(value: &TensorValue, perm: &[i64]) -> ConvertResult<TensorValue> {
    let rank = value.dims().len();
    let axes: Vec<usize> = perm.iter().map(|&p| p as usize).collect();
    let mut seen = axes.clone();
    seen.sort_unstable();
    if seen != (0..rank).collect::<Vec<_>>() {
        return Err(ConvertError::InvalidNode(format!(
            "perm {:?} is not a permutation of rank {}",
            perm, rank
        )));
    }

    let dims: Vec<i64> = axes.iter().map(|&a| value.dims()[a]).collect();
    let data = map_tensor_data!(value.data(), v => {
        let array = to_ndarray(value.dims(), v)?;
        array.permuted_axes(IxDyn(&axes)).iter().cloned().collect()
    });
    TensorValue::new(dims, data)
}

/// Serialize a value into an initializer
///
/// Numeric data goes to `raw_data` in little-endian order; strings use
/// `string_data`.
pub fn value_to_proto(value: &TensorValue, name: &str) -> TensorProto {
    let mut proto = TensorProto {
        dims: value.dims().to_vec(),
        data_type: value.dtype() as i32,
        name: name.to_string(),
        ..Default::default()
    };

    match value.data() {
        TensorData::String(v) => {
            proto.string_data = v.iter().map(|s| s.as_bytes().to_vec()).collect();
        }
        _ => {
            proto.raw_data = value.to_raw_bytes().unwrap_or_default();
        }
    }

    proto
}

/// Decode an initializer back into a value
///
/// This handles both raw_data and the typed data fields.
pub fn proto_to_value(tensor: &TensorProto) -> ConvertResult<TensorValue> {
    let dtype = i32_to_dtype(tensor.data_type)?;
    let expected_len = numel(&tensor.dims);

    let data = if dtype == DataType::String {
        let strings = tensor
            .string_data
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        TensorData::String(strings)
    } else if tensor.has_raw_data() {
        decode_raw(&tensor.raw_data, dtype, expected_len)?
    } else {
        match dtype {
            DataType::Float => TensorData::Float(tensor.float_data.clone()),
            DataType::Double => TensorData::Double(tensor.double_data.clone()),
            DataType::Int64 => TensorData::Int64(tensor.int64_data.clone()),
            DataType::Int32 => TensorData::Int32(tensor.int32_data.clone()),
            DataType::Int8 => TensorData::Int8(tensor.int32_data.iter().map(|&v| v as i8).collect()),
            DataType::Uint8 => {
                TensorData::Uint8(tensor.int32_data.iter().map(|&v| v as u8).collect())
            }
            DataType::Bool => TensorData::Bool(tensor.int32_data.iter().map(|&v| v != 0).collect()),
            other => {
                return Err(ConvertError::InvalidDataType(format!(
                    "cannot decode {} initializer",
                    dtype_name(other)
                )))
            }
        }
    };

    TensorValue::new(tensor.dims.clone(), data)
}

/// Decode little-endian raw bytes
fn decode_raw(raw: &[u8], dtype: DataType, expected_len: usize) -> ConvertResult<TensorData> {
    let elem_size = dtype_size(dtype)?;
    if raw.len() != expected_len * elem_size {
        return Err(ConvertError::InvalidNode(format!(
            "raw_data size {} doesn't match expected {} ({} elements x {} bytes)",
            raw.len(),
            expected_len * elem_size,
            expected_len,
            elem_size
        )));
    }

    let data = match dtype {
        DataType::Float => TensorData::Float(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DataType::Double => TensorData::Double(
            raw.chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DataType::Int32 => TensorData::Int32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DataType::Int64 => TensorData::Int64(
            raw.chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DataType::Int8 => TensorData::Int8(raw.iter().map(|&b| b as i8).collect()),
        DataType::Uint8 => TensorData::Uint8(raw.to_vec()),
        DataType::Bool => TensorData::Bool(raw.iter().map(|&b| b != 0).collect()),
        other => {
            return Err(ConvertError::InvalidDataType(format!(
                "cannot decode raw {} data",
                dtype_name(other)
            )))
        }
    };

    Ok(data)
}
