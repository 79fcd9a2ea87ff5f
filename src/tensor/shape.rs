//! Shape utilities for graph tensors
//!
//! A [`Shape`] may have unknown rank, and a known-rank shape may contain
//! unknown dimensions (stored as [`UNKNOWN_DIM`]).

use std::fmt;

use crate::error::{ConvertError, ConvertResult};

/// Marker for a dimension whose size is not known
pub const UNKNOWN_DIM: i64 = -1;

/// Tensor shape with optional rank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Option<Vec<i64>>);

impl Shape {
    /// Shape of unknown rank
    pub fn unknown() -> Self {
        Self(None)
    }

    /// Shape of known rank; negative entries are unknown dims
    pub fn known(dims: impl Into<Vec<i64>>) -> Self {
        let dims = dims
            .into()
            .into_iter()
            .map(|d| if d < 0 { UNKNOWN_DIM } else { d })
            .collect();
        Self(Some(dims))
    }

    /// Rank-0 shape
    pub fn scalar() -> Self {
        Self(Some(Vec::new()))
    }

    /// Known rank with every dim unknown
    pub fn with_rank(rank: usize) -> Self {
        Self(Some(vec![UNKNOWN_DIM; rank]))
    }

    /// Rank if known
    pub fn rank(&self) -> Option<usize> {
        self.0.as_ref().map(Vec::len)
    }

    /// Dims if the rank is known
    pub fn dims(&self) -> Option<&[i64]> {
        self.0.as_deref()
    }

    /// Size of one dim, `None` if rank or dim is unknown
    pub fn dim(&self, idx: usize) -> Option<i64> {
        self.0
            .as_ref()
            .and_then(|d| d.get(idx).copied())
            .filter(|&d| d >= 0)
    }

    /// Whether nothing at all is known
    pub fn is_unknown(&self) -> bool {
        self.0.is_none()
    }

    /// Whether rank and every dim are known
    pub fn is_fully_known(&self) -> bool {
        self.0
            .as_ref()
            .map(|d| d.iter().all(|&v| v >= 0))
            .unwrap_or(false)
    }

    /// Whether this is a known scalar
    pub fn is_scalar(&self) -> bool {
        matches!(&self.0, Some(d) if d.is_empty())
    }

    /// Element count when fully known
    pub fn num_elements(&self) -> Option<usize> {
        if self.is_fully_known() {
            self.0.as_ref().map(|d| numel(d))
        } else {
            None
        }
    }

    /// Combine a stored shape with newly inferred information
    ///
    /// Known dims of `self` are kept, unknown ones are filled from `other`.
    /// Returns `None` when the two disagree on rank or on a known dim.
    pub fn merge(&self, other: &Shape) -> Option<Shape> {
        match (&self.0, &other.0) {
            (None, _) => Some(other.clone()),
            (Some(_), None) => Some(self.clone()),
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let mut dims = Vec::with_capacity(a.len());
                for (&x, &y) in a.iter().zip(b) {
                    if x >= 0 && y >= 0 && x != y {
                        return None;
                    }
                    dims.push(if x >= 0 { x } else { y });
                }
                Some(Shape(Some(dims)))
            }
        }
    }

    /// Numpy-style broadcast of two shapes
    ///
    /// Unknown rank on either side yields unknown rank. Returns `None` when
    /// two known dims are incompatible.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => broadcast_dims(a, b).map(|d| Shape(Some(d))),
            _ => Some(Shape::unknown()),
        }
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape::known(dims)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Shape::known(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "<unknown rank>"),
            Some(dims) => {
                write!(f, "[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if *d < 0 {
                        write!(f, "?")?;
                    } else {
                        write!(f, "{}", d)?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Calculate total number of elements from dims
pub fn numel(shape: &[i64]) -> usize {
    shape.iter().map(|&d| d.max(0) as usize).product()
}

/// Broadcast two dim lists, aligning from the trailing dimension
pub fn broadcast_dims(shape_a: &[i64], shape_b: &[i64]) -> Option<Vec<i64>> {
    let rank = shape_a.len().max(shape_b.len());
    let mut result = vec![1i64; rank];

    for i in 0..rank {
        let dim_a = if i < shape_a.len() {
            shape_a[shape_a.len() - 1 - i]
        } else {
            1
        };
        let dim_b = if i < shape_b.len() {
            shape_b[shape_b.len() - 1 - i]
        } else {
            1
        };

        let out = if dim_a == dim_b || dim_b == 1 {
            dim_a
        } else if dim_a == 1 {
            dim_b
        } else if dim_a < 0 {
            dim_b
        } else if dim_b < 0 {
            dim_a
        } else {
            return None;
        };
        result[rank - 1 - i] = out;
    }

    Some(result)
}

/// Normalize axis to positive index
pub fn normalize_axis(axis: i64, ndim: usize) -> ConvertResult<usize> {
    let ndim_i64 = ndim as i64;
    let normalized = if axis < 0 { axis + ndim_i64 } else { axis };

    if normalized < 0 || normalized >= ndim_i64 {
        return Err(ConvertError::InvalidNode(format!(
            "Axis {} out of bounds for ndim {}",
            axis, ndim
        )));
    }

    Ok(normalized as usize)
}

/// Normalize multiple axes
pub fn normalize_axes(axes: &[i64], ndim: usize) -> ConvertResult<Vec<usize>> {
    axes.iter().map(|&a| normalize_axis(a, ndim)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
    }

    #[test]
    fn test_shape_queries() {
        let s = Shape::known(vec![2, -5, 3]);
        assert_eq!(s.rank(), Some(3));
        assert_eq!(s.dim(0), Some(2));
        assert_eq!(s.dim(1), None);
        assert!(!s.is_fully_known());
        assert!(Shape::unknown().is_unknown());
        assert!(Shape::scalar().is_scalar());
        assert_eq!(s.to_string(), "[2, ?, 3]");
    }

    #[test]
    fn test_merge_never_widens() {
        let stored = Shape::known(vec![2, -1]);
        let inferred = Shape::known(vec![-1, 4]);
        assert_eq!(stored.merge(&inferred), Some(Shape::known(vec![2, 4])));

        assert_eq!(stored.merge(&Shape::unknown()), Some(stored.clone()));
        assert_eq!(Shape::unknown().merge(&stored), Some(stored.clone()));
    }

    #[test]
    fn test_merge_conflict() {
        let a = Shape::known(vec![2, 3]);
        assert!(a.merge(&Shape::known(vec![2, 4])).is_none());
        assert!(a.merge(&Shape::known(vec![2])).is_none());
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::known(vec![3, 4]);
        let b = Shape::known(vec![4]);
        assert_eq!(a.broadcast(&b), Some(Shape::known(vec![3, 4])));

        let c = Shape::known(vec![1, 3, 1]);
        let d = Shape::known(vec![2, 1, 4]);
        assert_eq!(c.broadcast(&d), Some(Shape::known(vec![2, 3, 4])));

        assert!(a.broadcast(&Shape::known(vec![5])).is_none());
        assert!(a.broadcast(&Shape::unknown()).unwrap().is_unknown());
        assert_eq!(
            Shape::known(vec![-1, 4]).broadcast(&Shape::known(vec![3, 1])),
            Some(Shape::known(vec![3, 4]))
        );
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 4).unwrap(), 3);
        assert!(normalize_axis(4, 4).is_err());
        assert!(normalize_axis(-5, 4).is_err());
    }
}
