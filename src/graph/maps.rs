//! Graph map types
//!
//! Defines the core data structures for efficient graph traversal.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::proto::tensor_proto::DataType;
use crate::tensor::Shape;

/// Stable handle to a node slot in a graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Arena slot index
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shape and type facts known about one tensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorInfo {
    /// Shape, possibly partially known
    pub shape: Shape,
    /// Element type if known
    pub dtype: Option<DataType>,
    /// Set when the shape was forced by the caller
    pub overridden: bool,
}

impl TensorInfo {
    /// Info with a shape and dtype
    pub fn new(shape: Shape, dtype: Option<DataType>) -> Self {
        Self {
            shape,
            dtype,
            overridden: false,
        }
    }

    /// Whether inference could add nothing to this entry
    pub fn is_complete(&self) -> bool {
        self.dtype.is_some() && (self.overridden || self.shape.is_fully_known())
    }
}

/// Type alias for producer map: tensor id → producing node
pub type ProducerMap = FxHashMap<String, NodeId>;

/// Type alias for consumer map: tensor id → consuming nodes
/// One entry per consuming input slot, SmallVec optimized for 1-4 consumers
pub type ConsumerMap = FxHashMap<String, SmallVec<[NodeId; 4]>>;

/// Type alias for name index: node name → node
pub type NameIndex = FxHashMap<String, NodeId>;

/// Type alias for tensor info map: tensor id → shape/dtype facts
pub type TensorInfoMap = FxHashMap<String, TensorInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_info_complete() {
        let mut info = TensorInfo::new(Shape::known(vec![2, 3]), Some(DataType::Float));
        assert!(info.is_complete());

        info.shape = Shape::known(vec![-1, 3]);
        assert!(!info.is_complete());

        info.overridden = true;
        assert!(info.is_complete());

        info.dtype = None;
        assert!(!info.is_complete());
    }
}
