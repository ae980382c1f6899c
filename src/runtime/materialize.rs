//! Row materialization: evaluate a loader node's bindings against a record node.

use crate::record::{RecordNode, TagResolver};
use crate::runtime::context::ForeignKeyContext;
use crate::runtime::spec::{LoaderNode, SourceExpr};
use crate::store::{Row, Value};

/// Evaluate one source expression
pub fn evaluate(expr: &SourceExpr, node: RecordNode<'_>, fk: &ForeignKeyContext) -> Option<Value> {
    match expr {
        SourceExpr::Literal(value) => Some(value.clone()),
        SourceExpr::TagRef(tag) => node.resolve(tag).map(Value::Text),
        SourceExpr::ForeignKeyRef { table, .. } => fk.peek(table).map(Value::Integer),
        SourceExpr::Deferred => None,
    }
}

/// Build the candidate row of `loader` for `node`.
///
/// Returns `None` when the loader has no table or when every binding
/// resolved to nothing. Unresolved columns are left out of the row.
pub fn materialize(node: RecordNode<'_>, loader: &LoaderNode, fk: &ForeignKeyContext) -> Option<Row> {
    loader.table()?;

    let mut row = Row::new();
    for (column, expr) in loader.bindings() {
        if let Some(value) = evaluate(expr, node, fk) {
            row.insert(column.as_str(), value);
        }
    }

    if row.is_empty() {
        None
    } else {
        Some(row)
    }
}
