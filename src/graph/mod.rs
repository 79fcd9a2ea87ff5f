//! Graph model
//!
//! This module provides the in-memory graph the converter works on:
//!
//! - [`Graph`]: arena of nodes with O(1) lookups by name and by tensor
//! - [`Node`] / [`NewNode`]: operations and the builder used to insert them
//! - [`AttrValue`]: closed attribute union, including nested graphs
//! - [`maps`]: type definitions for the lookup maps
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::graph::{Graph, NewNode};
//!
//! let mut graph = Graph::new(13);
//! graph.add_input("x:0");
//! let relu = graph.add_node(NewNode::new("Relu").input("x:0"))?;
//!
//! // Traverse graph
//! let out = graph.output_of(relu, 0);
//! let consumers = graph.find_output_consumers(&out);
//! ```
//!
//! # Maps
//!
//! | Map | Description |
//! |-----|-------------|
//! | `name_index` | node name → slot |
//! | `producer_map` | tensor id → producer slot |
//! | `consumer_map` | tensor id → consumer slots |
//! | `tensor_info` | tensor id → shape, dtype, override flag |

pub mod accessors;
pub mod attr;
pub mod context;
pub mod maps;
pub mod mutators;
pub mod node;
pub mod target;

// Re-export main types
pub use attr::AttrValue;
pub use context::Graph;
pub use maps::{ConsumerMap, NameIndex, NodeId, ProducerMap, TensorInfo, TensorInfoMap};
pub use node::{AttrMap, NewNode, Node};
pub use target::Target;
