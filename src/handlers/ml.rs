//! Static hash-table lookups
//!
//! Lookups against initialized tables are resolved at conversion time:
//! a constant key folds to a constant, any other key becomes an
//! `ai.onnx.ml` `CategoryMapper` carrying the table contents. The same
//! functions back the pre-dispatch lookup rewriter.

use log::debug;

use crate::convert::{InitializedTables, TableEntry};
use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, NewNode, Node, NodeId};
use crate::opset::{default_domain_version, OpsetId, ML_DOMAIN};
use crate::pattern::skip_identity_chain;
use crate::proto::tensor_proto::DataType;
use crate::tensor::{TensorData, TensorValue};

use super::registry::{register, HandlerRegistry};
use super::{retarget, HandlerContext};

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["HashTableV2"] => { 8 => hash_table });
    register!(reg, ["LookupTableFindV2"] => { 8 => lookup_table_find });
    register!(reg, ["LookupTableSizeV2"] => { 1 => lookup_table_size });
}

/// Tables are resolved by their consumers and pruned with the last one
fn hash_table(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let op = ctx.node(id)?.op_type().to_string();
    retarget(ctx, id, &op, &["shared_name", "key_dtype", "value_dtype"])
}

fn lookup_table_find(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    fold_lookup(ctx.graph, ctx.tables, id)
}

fn lookup_table_size(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    fold_table_size(ctx.graph, ctx.tables, id)
}

// ============================================================================
// Shared lookup logic
// ============================================================================

/// Find the table a lookup node reads through its resource input
pub(crate) fn resolve_table<'t>(
    graph: &Graph,
    tables: &'t InitializedTables,
    node: &Node,
) -> ConvertResult<&'t TableEntry> {
    let resource = node.input(0).unwrap_or_default();
    let (_, table_node) = skip_identity_chain(graph, resource).ok_or_else(|| {
        ConvertError::precondition(node.name(), format!("table input {} has no producer", resource))
    })?;
    let shared_name = table_node.get_string("shared_name").map_err(|_| {
        ConvertError::precondition(
            node.name(),
            format!("table node {} carries no shared_name", table_node.name()),
        )
    })?;
    tables.get(&shared_name).ok_or_else(|| ConvertError::MissingTable {
        node: node.name().to_string(),
        table: shared_name,
    })
}

/// Remove the table resource and identity chain behind `tensor` once unread
pub(crate) fn prune_table_chain(graph: &mut Graph, tensor: &str) {
    let mut current = tensor.to_string();
    while let Some(id) = graph.producer(&current) {
        let Some(node) = graph.node(id) else { break };
        if node.outputs().iter().any(|o| graph.is_used(o)) {
            break;
        }
        let next = node
            .is_op("Identity")
            .then(|| node.input(0).map(str::to_string))
            .flatten();
        debug!("pruning unused table node {}", node.name());
        graph.remove_node(id);
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
}

/// Declared element type of a lookup operand: attribute first, then inference
fn operand_dtype(graph: &Graph, node: &Node, attr: &str, tensor: &str) -> Option<DataType> {
    node.get_type(attr).ok().or_else(|| graph.get_dtype(tensor))
}

/// Fold `LookupTableFindV2(table, keys, default)`
pub(crate) fn fold_lookup(graph: &mut Graph, tables: &InitializedTables, id: NodeId) -> ConvertResult<()> {
    let node = graph
        .node(id)
        .cloned()
        .ok_or_else(|| ConvertError::InvalidNode(format!("no node in slot {}", id.index())))?;
    let table = resolve_table(graph, tables, &node)?;
    let resource = node.input(0).unwrap_or_default().to_string();
    let keys = node.input(1).unwrap_or_default().to_string();
    let default_input = node.input(2).unwrap_or_default().to_string();

    let default = graph
        .const_value(&default_input)
        .and_then(|v| v.as_i64s())
        .and_then(|v| v.first().copied())
        .ok_or_else(|| ConvertError::precondition(node.name(), "Default value of table lookup must be const"))?;

    let output = node.output(0).unwrap_or_default().to_string();
    let value_dtype = operand_dtype(graph, &node, "Tout", &output)
        .or_else(|| graph.get_dtype(&default_input));
    let key_dtype = operand_dtype(graph, &node, "Tin", &keys);
    if value_dtype != Some(DataType::Int64) || key_dtype != Some(DataType::String) {
        return Err(ConvertError::precondition(
            node.name(),
            format!(
                "only string to int64 lookups are supported, got {:?} to {:?}",
                key_dtype, value_dtype
            ),
        ));
    }

    let replacement = match graph.const_value(&keys) {
        Some(key_value) => {
            let strings = key_value
                .as_strings()
                .ok_or_else(|| ConvertError::precondition(node.name(), "lookup keys must be strings"))?;
            let found: Vec<i64> = strings
                .iter()
                .map(|k| table.lookup(k).unwrap_or(default))
                .collect();
            debug!("folding constant lookup {} over {} key(s)", node.name(), found.len());
            let value = TensorValue::new(key_value.dims().to_vec(), TensorData::Int64(found))?;
            NewNode::new("Const").attr("value", value)
        }
        None => {
            graph.add_extra_opset(OpsetId::new(ML_DOMAIN, default_domain_version(ML_DOMAIN)));
            NewNode::new("CategoryMapper")
                .domain(ML_DOMAIN)
                .input(keys)
                .attr("cats_strings", table.keys.clone())
                .attr("cats_int64s", table.values.clone())
                .attr("default_int64", default)
                .dtypes(vec![DataType::Int64])
        }
    };

    graph.replace_node(id, replacement)?;
    prune_table_chain(graph, &resource);
    Ok(())
}

/// Fold `LookupTableSizeV2(table)` to the key count
pub(crate) fn fold_table_size(graph: &mut Graph, tables: &InitializedTables, id: NodeId) -> ConvertResult<()> {
    let node = graph
        .node(id)
        .cloned()
        .ok_or_else(|| ConvertError::InvalidNode(format!("no node in slot {}", id.index())))?;
    let size = resolve_table(graph, tables, &node)?.len() as i64;
    let resource = node.input(0).unwrap_or_default().to_string();

    graph.replace_node(
        id,
        NewNode::new("Const")
            .attr("value", TensorValue::scalar_i64(size))
            .dtypes(vec![DataType::Int64]),
    )?;
    prune_table_chain(graph, &resource);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;

    fn make_tables() -> InitializedTables {
        [(
            "vocab",
            TableEntry::new(vec!["a".to_string(), "b".to_string()], vec![1, 2]),
        )]
        .into_iter()
        .collect()
    }

    /// table -> identity -> lookup(keys, default)
    fn make_lookup_graph(keys: Option<TensorValue>) -> Graph {
        let mut graph = Graph::new(13);
        graph
            .add_node(
                NewNode::new("HashTableV2")
                    .name("table")
                    .attr("shared_name", "vocab"),
            )
            .unwrap();
        graph
            .add_node(NewNode::new("Identity").name("table_id").input("table:0"))
            .unwrap();
        match keys {
            Some(value) => {
                graph.make_const("keys", value).unwrap();
            }
            None => {
                graph.add_input("keys");
                graph.set_dtype("keys", DataType::String);
                graph.set_shape("keys", Shape::known(vec![-1]));
            }
        }
        graph.make_const("default", TensorValue::scalar_i64(0)).unwrap();
        graph
            .add_node(
                NewNode::new("LookupTableFindV2")
                    .name("lookup")
                    .inputs(["table_id:0", "keys", "default"])
                    .attr("Tin", DataType::String)
                    .attr("Tout", DataType::Int64)
                    .source(),
            )
            .unwrap();
        graph.set_outputs(vec!["lookup:0".to_string()]);
        graph
    }

    #[test]
    fn test_const_key_folds() {
        let keys = TensorValue::new(
            vec![2],
            TensorData::String(vec!["b".to_string(), "z".to_string()]),
        )
        .unwrap();
        let mut graph = make_lookup_graph(Some(keys));
        let id = graph.node_id("lookup").unwrap();
        fold_lookup(&mut graph, &make_tables(), id).unwrap();

        let value = graph.const_value("lookup:0").unwrap();
        assert_eq!(value.as_i64s(), Some(vec![2, 0]));
        assert!(!graph.has_node("table"));
        assert!(!graph.has_node("table_id"));
    }

    #[test]
    fn test_dynamic_key_becomes_category_mapper() {
        let mut graph = make_lookup_graph(None);
        let id = graph.node_id("lookup").unwrap();
        fold_lookup(&mut graph, &make_tables(), id).unwrap();

        let node = graph.node_by_name("lookup").unwrap();
        assert_eq!(node.op_type(), "CategoryMapper");
        assert_eq!(node.domain(), ML_DOMAIN);
        assert_eq!(node.get_strings("cats_strings").unwrap(), vec!["a", "b"]);
        assert_eq!(node.get_ints("cats_int64s").unwrap(), vec![1, 2]);
        assert_eq!(node.get_int("default_int64").unwrap(), 0);
        assert!(graph.extra_opsets().iter().any(|o| o.domain == ML_DOMAIN));
        assert!(!graph.has_node("table"));
    }

    #[test]
    fn test_missing_table() {
        let mut graph = make_lookup_graph(None);
        let id = graph.node_id("lookup").unwrap();
        let err = fold_lookup(&mut graph, &InitializedTables::new(), id).unwrap_err();
        assert!(matches!(err, ConvertError::MissingTable { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_non_const_default_rejected() {
        let mut graph = make_lookup_graph(None);
        let id = graph.node_id("lookup").unwrap();
        graph.add_input("dyn_default");
        graph.set_node_input(id, 2, "dyn_default");
        let err = fold_lookup(&mut graph, &make_tables(), id).unwrap_err();
        assert!(matches!(err, ConvertError::Precondition { .. }));
    }

    #[test]
    fn test_table_size() {
        let mut graph = Graph::new(13);
        graph
            .add_node(NewNode::new("HashTableV2").name("table").attr("shared_name", "vocab"))
            .unwrap();
        graph
            .add_node(NewNode::new("LookupTableSizeV2").name("size").input("table:0").source())
            .unwrap();
        graph.set_outputs(vec!["size:0".to_string()]);
        let id = graph.node_id("size").unwrap();
        fold_table_size(&mut graph, &make_tables(), id).unwrap();

        assert_eq!(graph.const_value("size:0").unwrap().as_scalar_i64(), Some(2));
        assert!(!graph.has_node("table"));
    }
}
