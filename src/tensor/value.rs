//! Constant tensor values
//!
//! [`TensorValue`] is the payload of `Const` nodes and tensor attributes.
//! Data is kept in typed vectors in row-major order.

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;

use super::dtype::dtype_name;
use super::shape::numel;

/// Typed element storage
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// float32 elements
    Float(Vec<f32>),
    /// float64 elements
    Double(Vec<f64>),
    /// int32 elements
    Int32(Vec<i32>),
    /// int64 elements
    Int64(Vec<i64>),
    /// int8 elements
    Int8(Vec<i8>),
    /// uint8 elements
    Uint8(Vec<u8>),
    /// bool elements
    Bool(Vec<bool>),
    /// string elements
    String(Vec<String>),
}

/// Apply the same expression to whichever typed vector a [`TensorData`] holds
///
/// The body is instantiated once per element type, so it may call generic
/// helpers. Evaluates to a new `TensorData` of the same variant.
macro_rules! map_tensor_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::tensor::TensorData::Float($v) => $crate::tensor::TensorData::Float($body),
            $crate::tensor::TensorData::Double($v) => $crate::tensor::TensorData::Double($body),
            $crate::tensor::TensorData::Int32($v) => $crate::tensor::TensorData::Int32($body),
            $crate::tensor::TensorData::Int64($v) => $crate::tensor::TensorData::Int64($body),
            $crate::tensor::TensorData::Int8($v) => $crate::tensor::TensorData::Int8($body),
            $crate::tensor::TensorData::Uint8($v) => $crate::tensor::TensorData::Uint8($body),
            $crate::tensor::TensorData::Bool($v) => $crate::tensor::TensorData::Bool($body),
            $crate::tensor::TensorData::String($v) => $crate::tensor::TensorData::String($body),
        }
    };
}
pub(crate) use map_tensor_data;

impl TensorData {
    /// Number of stored elements
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(v) => v.len(),
            TensorData::Double(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::String(v) => v.len(),
        }
    }

    /// Whether no elements are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the stored vector
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Float(_) => DataType::Float,
            TensorData::Double(_) => DataType::Double,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Int8(_) => DataType::Int8,
            TensorData::Uint8(_) => DataType::Uint8,
            TensorData::Bool(_) => DataType::Bool,
            TensorData::String(_) => DataType::String,
        }
    }
}

/// A constant tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    dims: Vec<i64>,
    data: TensorData,
}

impl TensorValue {
    /// Create a tensor, checking that the data length matches the dims
    pub fn new(dims: Vec<i64>, data: TensorData) -> ConvertResult<Self> {
        if dims.iter().any(|&d| d < 0) {
            return Err(ConvertError::InvalidNode(format!(
                "Constant dims {:?} contain unknown sizes",
                dims
            )));
        }
        let expected = numel(&dims);
        if data.len() != expected {
            return Err(ConvertError::InvalidNode(format!(
                "Data length {} does not match dims {:?} (expected {})",
                data.len(),
                dims,
                expected
            )));
        }
        Ok(Self { dims, data })
    }

    /// Scalar float32
    pub fn scalar_f32(value: f32) -> Self {
        Self {
            dims: Vec::new(),
            data: TensorData::Float(vec![value]),
        }
    }

    /// Scalar int64
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            dims: Vec::new(),
            data: TensorData::Int64(vec![value]),
        }
    }

    /// Scalar string
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self {
            dims: Vec::new(),
            data: TensorData::String(vec![value.into()]),
        }
    }

    /// 1-D int64 vector
    pub fn vec_i64(values: Vec<i64>) -> Self {
        Self {
            dims: vec![values.len() as i64],
            data: TensorData::Int64(values),
        }
    }

    /// 1-D float32 vector
    pub fn vec_f32(values: Vec<f32>) -> Self {
        Self {
            dims: vec![values.len() as i64],
            data: TensorData::Float(values),
        }
    }

    /// Dimensions
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// Element storage
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Split into dims and data
    pub fn into_parts(self) -> (Vec<i64>, TensorData) {
        (self.dims, self.data)
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Number of elements
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// Whether this is rank 0
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Same data under new dims with the same element count
    pub fn reshaped(&self, dims: Vec<i64>) -> ConvertResult<Self> {
        Self::new(dims, self.data.clone())
    }

    /// Integer elements widened to i64
    pub fn as_i64s(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::Int64(v) => Some(v.clone()),
            TensorData::Int32(v) => Some(v.iter().map(|&x| x as i64).collect()),
            TensorData::Int8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            TensorData::Uint8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            _ => None,
        }
    }

    /// Numeric elements as f32
    pub fn as_f32s(&self) -> Option<Vec<f32>> {
        match &self.data {
            TensorData::Float(v) => Some(v.clone()),
            TensorData::Double(v) => Some(v.iter().map(|&x| x as f32).collect()),
            TensorData::Int32(v) => Some(v.iter().map(|&x| x as f32).collect()),
            TensorData::Int64(v) => Some(v.iter().map(|&x| x as f32).collect()),
            TensorData::Int8(v) => Some(v.iter().map(|&x| x as f32).collect()),
            TensorData::Uint8(v) => Some(v.iter().map(|&x| x as f32).collect()),
            _ => None,
        }
    }

    /// String elements
    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.data {
            TensorData::String(v) => Some(v),
            _ => None,
        }
    }

    /// The single element of a one-element integer tensor
    pub fn as_scalar_i64(&self) -> Option<i64> {
        let values = self.as_i64s()?;
        (values.len() == 1).then(|| values[0])
    }

    /// Payload size in bytes, strings counted by length
    pub fn byte_size(&self) -> usize {
        match &self.data {
            TensorData::Float(v) => v.len() * 4,
            TensorData::Double(v) => v.len() * 8,
            TensorData::Int32(v) => v.len() * 4,
            TensorData::Int64(v) => v.len() * 8,
            TensorData::Int8(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::String(v) => v.iter().map(String::len).sum(),
        }
    }

    /// Little-endian raw payload, `None` for strings
    pub fn to_raw_bytes(&self) -> Option<Vec<u8>> {
        let bytes = match &self.data {
            TensorData::Float(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Double(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int8(v) => v.iter().map(|&x| x as u8).collect(),
            TensorData::Uint8(v) => v.clone(),
            TensorData::Bool(v) => v.iter().map(|&x| x as u8).collect(),
            TensorData::String(_) => return None,
        };
        Some(bytes)
    }

    /// Convert elements to another numeric type
    pub fn cast(&self, to: DataType) -> ConvertResult<Self> {
        if to == self.dtype() {
            return Ok(self.clone());
        }
        let data = match (&self.data, to) {
            (TensorData::String(_), _) | (_, DataType::String) => {
                return Err(ConvertError::InvalidDataType(format!(
                    "cannot cast {} to {}",
                    dtype_name(self.dtype()),
                    dtype_name(to)
                )))
            }
            (TensorData::Bool(v), _) => {
                let as_f64: Vec<f64> = v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect();
                cast_from_f64(&as_f64, to)?
            }
            (TensorData::Int64(v), _) if to != DataType::Float && to != DataType::Double => {
                // integer to integer keeps full i64 precision
                cast_from_i64(v, to)?
            }
            (TensorData::Int32(v), _) if to == DataType::Int64 => {
                TensorData::Int64(v.iter().map(|&x| x as i64).collect())
            }
            (data, _) => {
                let as_f64 = numeric_as_f64(data);
                cast_from_f64(&as_f64, to)?
            }
        };
        Ok(Self {
            dims: self.dims.clone(),
            data,
        })
    }
}

fn numeric_as_f64(data: &TensorData) -> Vec<f64> {
    match data {
        TensorData::Float(v) => v.iter().map(|&x| x as f64).collect(),
        TensorData::Double(v) => v.clone(),
        TensorData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
        TensorData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
        TensorData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
        TensorData::Uint8(v) => v.iter().map(|&x| x as f64).collect(),
        TensorData::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        TensorData::String(_) => Vec::new(),
    }
}

fn cast_from_f64(v: &[f64], to: DataType) -> ConvertResult<TensorData> {
    Ok(match to {
        DataType::Float => TensorData::Float(v.iter().map(|&x| x as f32).collect()),
        DataType::Double => TensorData::Double(v.to_vec()),
        DataType::Int32 => TensorData::Int32(v.iter().map(|&x| x as i32).collect()),
        DataType::Int64 => TensorData::Int64(v.iter().map(|&x| x as i64).collect()),
        DataType::Int8 => TensorData::Int8(v.iter().map(|&x| x as i8).collect()),
        DataType::Uint8 => TensorData::Uint8(v.iter().map(|&x| x as u8).collect()),
        DataType::Bool => TensorData::Bool(v.iter().map(|&x| x != 0.0).collect()),
        other => {
            return Err(ConvertError::InvalidDataType(format!(
                "no constant representation for {}",
                dtype_name(other)
            )))
        }
    })
}

fn cast_from_i64(v: &[i64], to: DataType) -> ConvertResult<TensorData> {
    Ok(match to {
        DataType::Int32 => TensorData::Int32(v.iter().map(|&x| x as i32).collect()),
        DataType::Int8 => TensorData::Int8(v.iter().map(|&x| x as i8).collect()),
        DataType::Uint8 => TensorData::Uint8(v.iter().map(|&x| x as u8).collect()),
        DataType::Bool => TensorData::Bool(v.iter().map(|&x| x != 0).collect()),
        other => {
            return Err(ConvertError::InvalidDataType(format!(
                "no constant representation for {}",
                dtype_name(other)
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_length() {
        assert!(TensorValue::new(vec![2, 2], TensorData::Float(vec![1.0; 4])).is_ok());
        assert!(TensorValue::new(vec![2, 2], TensorData::Float(vec![1.0; 3])).is_err());
        assert!(TensorValue::new(vec![-1], TensorData::Float(vec![])).is_err());
    }

    #[test]
    fn test_scalars() {
        let v = TensorValue::scalar_i64(5);
        assert!(v.is_scalar());
        assert_eq!(v.as_scalar_i64(), Some(5));
        assert_eq!(v.dtype(), DataType::Int64);

        let s = TensorValue::scalar_string("b");
        assert_eq!(s.as_strings(), Some(&["b".to_string()][..]));
    }

    #[test]
    fn test_raw_bytes_little_endian() {
        let v = TensorValue::vec_i64(vec![1, 256]);
        let raw = v.to_raw_bytes().unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(raw[0], 1);
        assert_eq!(raw[9], 1);
        assert!(TensorValue::scalar_string("x").to_raw_bytes().is_none());
    }

    #[test]
    fn test_cast() {
        let v = TensorValue::vec_f32(vec![1.7, -2.2]);
        let i = v.cast(DataType::Int32).unwrap();
        assert_eq!(i.data(), &TensorData::Int32(vec![1, -2]));

        let big = TensorValue::vec_i64(vec![i64::MAX]);
        let same = big.cast(DataType::Int64).unwrap();
        assert_eq!(same.as_i64s(), Some(vec![i64::MAX]));

        assert!(TensorValue::scalar_string("x").cast(DataType::Float).is_err());
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(TensorValue::vec_f32(vec![0.0; 300]).byte_size(), 1200);
        assert_eq!(TensorValue::scalar_string("abc").byte_size(), 3);
    }
}
