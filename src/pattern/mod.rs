//! Pattern matching and traversal over the converted graph
//!
//! The optimizer passes and rewriters locate their targets with:
//! 1. Reverse chain matching of op kinds (anchor first, then producers)
//! 2. Forward and backward breadth-first walks
//! 3. Op kind groupings
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::pattern::{matcher, ops};
//!
//! for m in matcher(&graph).find_all_matches(ops::TRANSPOSE_PAIR) {
//!     // m.nodes[0] = outer Transpose, m.nodes[1] = inner Transpose
//! }
//! ```

pub mod matcher;
pub mod ops;
pub mod traversal;

// Re-export main types
pub use matcher::{matcher, skip_identity_chain, MatchResult, PatternMatcher};
pub use ops::is_foldable;
pub use traversal::{live_nodes, BfsIterator, Direction};

// Re-export common groupings
pub use ops::{BROADCAST_OPS, FOLDABLE, IDENTITY_LIKE, TRANSPOSE_PAIR, UNARY_ELEMENTWISE};
