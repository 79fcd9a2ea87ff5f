//! Versioned handler registry
//!
//! Op kind → list of `(since_version, handler)` sorted ascending. For a
//! requested opset the entry with the greatest `since_version <= opset`
//! wins. The built-in table is assembled once per process and shared
//! read-only.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use super::HandlerFn;

/// Register one handler under several op kinds and versions
///
/// ```ignore
/// register!(reg, ["Add", "Sub"] => { 4 => binary_v4, 7 => binary_v7 });
/// ```
macro_rules! register {
    (@op $reg:ident, $op:literal, { $($since:literal => $handler:path),+ $(,)? }) => {
        $( $reg.register($op, $since, $handler); )+
    };
    ($reg:ident, [$($op:literal),+ $(,)?] => $versions:tt) => {
        $( $crate::handlers::registry::register!(@op $reg, $op, $versions); )+
    };
}
pub(crate) use register;

/// Op kind → versioned handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<String, Vec<(i64, HandlerFn)>>,
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared table of every built-in handler
    pub fn builtin() -> &'static HandlerRegistry {
        static BUILTIN: OnceLock<HandlerRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut reg = HandlerRegistry::new();
            super::io_ops::register_handlers(&mut reg);
            super::math::register_handlers(&mut reg);
            super::logical::register_handlers(&mut reg);
            super::nn::register_handlers(&mut reg);
            super::array::register_handlers(&mut reg);
            super::reduce::register_handlers(&mut reg);
            super::control_flow::register_handlers(&mut reg);
            super::ml::register_handlers(&mut reg);
            super::quantize::register_handlers(&mut reg);
            reg
        })
    }

    /// Add a handler; an existing entry with the same version is replaced
    pub fn register(&mut self, op_type: &str, since: i64, handler: HandlerFn) {
        let entries = self.handlers.entry(op_type.to_string()).or_default();
        match entries.binary_search_by_key(&since, |(v, _)| *v) {
            Ok(pos) => entries[pos].1 = handler,
            Err(pos) => entries.insert(pos, (since, handler)),
        }
    }

    /// Handler and its version for an op kind at an opset
    pub fn resolve_entry(&self, op_type: &str, opset: i64) -> Option<(i64, HandlerFn)> {
        let entries = self.handlers.get(op_type)?;
        let pos = entries.partition_point(|(since, _)| *since <= opset);
        pos.checked_sub(1).map(|i| entries[i])
    }

    /// Handler for an op kind at an opset
    pub fn resolve(&self, op_type: &str, opset: i64) -> Option<HandlerFn> {
        self.resolve_entry(op_type, opset).map(|(_, f)| f)
    }

    /// Registered versions for an op kind, ascending
    pub fn versions(&self, op_type: &str) -> Vec<i64> {
        self.handlers
            .get(op_type)
            .map(|e| e.iter().map(|(v, _)| *v).collect())
            .unwrap_or_default()
    }

    /// Whether any version is registered for the op kind
    pub fn contains(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    /// Registered op kinds, sorted
    pub fn op_types(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }

    /// Number of registered op kinds
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("op_types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertResult;
    use crate::graph::NodeId;
    use crate::handlers::HandlerContext;

    fn noop(_: &mut HandlerContext<'_>, _: NodeId) -> ConvertResult<()> {
        Ok(())
    }

    fn make_registry() -> HandlerRegistry {
        let mut reg = HandlerRegistry::new();
        register!(reg, ["Foo"] => { 9 => noop, 4 => noop, 7 => noop });
        reg
    }

    #[test]
    fn test_versions_sorted() {
        assert_eq!(make_registry().versions("Foo"), vec![4, 7, 9]);
    }

    #[test]
    fn test_resolve_picks_greatest_not_above() {
        let reg = make_registry();
        assert_eq!(reg.resolve_entry("Foo", 8).map(|(v, _)| v), Some(7));
        assert_eq!(reg.resolve_entry("Foo", 7).map(|(v, _)| v), Some(7));
        assert_eq!(reg.resolve_entry("Foo", 12).map(|(v, _)| v), Some(9));
        assert!(reg.resolve("Foo", 3).is_none());
        assert!(reg.resolve("Bar", 12).is_none());
    }

    #[test]
    fn test_builtin_covers_catalogue() {
        let reg = HandlerRegistry::builtin();
        for op in [
            "Const",
            "Placeholder",
            "AddV2",
            "RealDiv",
            "MatMul",
            "ConcatV2",
            "While",
            "LookupTableFindV2",
            "LookupTableSizeV2",
            "HashTableV2",
            "Conv2D",
            "Quantize",
        ] {
            assert!(reg.contains(op), "missing handler for {}", op);
        }
        assert_eq!(reg.versions("Add"), vec![4, 7]);
        assert_eq!(reg.versions("Mean"), vec![1, 13, 18]);
    }
}
