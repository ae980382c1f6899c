//! In-memory transactional backend.
//!
//! Enforces the declared schema the way a relational store would: column
//! types, non-nullable columns, foreign key existence and uniqueness
//! constraints (rows with a NULL in a constrained column never conflict).
//! Key sequences are not rolled back, matching database sequences.
//!
//! Transactions keep an undo log of the rows inserted since each `begin`
//! rather than a copy of the tables, so opening one is O(1).

use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::store::{Backend, Condition, Filter, PrimaryKey, Row, TableSchema, Value};

/// A persisted row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: PrimaryKey,
    pub values: IndexMap<String, Value>,
}

impl StoredRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Rows inserted since the matching `begin`, in insertion order
type UndoLog = Vec<(String, PrimaryKey)>;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: BTreeMap<String, Vec<StoredRow>>,
    sequences: HashMap<String, PrimaryKey>,
    undo: Vec<UndoLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` in key order
    pub fn rows(&self, table: &str) -> &[StoredRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn get(&self, table: &str, key: PrimaryKey) -> Option<&StoredRow> {
        self.rows(table).iter().find(|row| row.key == key)
    }

    /// Names of tables holding at least one row
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Number of open (possibly nested) transactions
    pub fn open_transactions(&self) -> usize {
        self.undo.len()
    }

    fn check_not_null(table: &TableSchema, values: &IndexMap<String, Value>) -> Result<(), StoreError> {
        let missing = table
            .columns()
            .find(|(name, def)| !def.nullable && *name != table.primary_key() && !values.contains_key(*name));
        match missing {
            Some((name, _)) => Err(StoreError::NotNull {
                table: table.name().to_string(),
                column: Some(name.to_string()),
            }),
            None => Ok(()),
        }
    }

    fn check_foreign_keys(&self, table: &TableSchema, values: &IndexMap<String, Value>) -> Result<(), StoreError> {
        for (column, target) in table.foreign_keys() {
            let Some(value) = values.get(column) else {
                continue;
            };
            let exists = matches!(value, Value::Integer(key) if self.rows(target).iter().any(|row| row.key == *key));
            if !exists {
                return Err(StoreError::ForeignKey {
                    table: table.name().to_string(),
                    column: Some(column.to_string()),
                });
            }
        }
        Ok(())
    }

    fn check_unique(&self, table: &TableSchema, values: &IndexMap<String, Value>) -> Result<(), StoreError> {
        for constraint in table.unique_constraints() {
            let candidate: Option<Vec<&Value>> = constraint.iter().map(|c| values.get(c)).collect();
            let Some(candidate) = candidate else {
                continue;
            };
            let conflict = self.rows(table.name()).iter().any(|row| {
                constraint
                    .iter()
                    .zip(&candidate)
                    .all(|(column, value)| row.get(column) == Some(*value))
            });
            if conflict {
                return Err(StoreError::UniqueViolation {
                    table: table.name().to_string(),
                    constraint: Some(constraint.join(", ")),
                });
            }
        }
        Ok(())
    }

    fn matches(row: &StoredRow, filter: &Filter) -> bool {
        filter.conditions().all(|(column, condition)| match (condition, row.get(column)) {
            (Condition::Equals(expected), Some(actual)) => actual == expected,
            (Condition::Text { needle, mode }, Some(actual)) => mode.matches(&actual.to_string(), needle),
            (_, None) => false,
        })
    }
}

impl Backend for MemoryBackend {
    fn insert(&mut self, table: &TableSchema, row: &Row) -> Result<PrimaryKey, StoreError> {
        let values: IndexMap<String, Value> = table.coerce_row(row)?.into_iter().collect();
        if values.contains_key(table.primary_key()) {
            return Err(StoreError::Query {
                table: Some(table.name().to_string()),
                message: format!("primary key '{}' is generated by the store", table.primary_key()),
            });
        }

        Self::check_not_null(table, &values)?;
        self.check_foreign_keys(table, &values)?;
        self.check_unique(table, &values)?;

        let sequence = self.sequences.entry(table.name().to_string()).or_insert(0);
        *sequence += 1;
        let key = *sequence;

        self.tables
            .entry(table.name().to_string())
            .or_default()
            .push(StoredRow { key, values });
        if let Some(log) = self.undo.last_mut() {
            log.push((table.name().to_string(), key));
        }
        Ok(key)
    }

    fn find(&mut self, table: &TableSchema, filter: &Filter) -> Result<Option<PrimaryKey>, StoreError> {
        Ok(self
            .rows(table.name())
            .iter()
            .find(|row| Self::matches(row, filter))
            .map(|row| row.key))
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.undo.push(UndoLog::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let log = self
            .undo
            .pop()
            .ok_or_else(|| StoreError::Transaction("commit without an open transaction".to_string()))?;
        // A committed savepoint still belongs to the enclosing transaction
        if let Some(outer) = self.undo.last_mut() {
            outer.extend(log);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let log = self
            .undo
            .pop()
            .ok_or_else(|| StoreError::Transaction("rollback without an open transaction".to_string()))?;
        for (table, key) in log.into_iter().rev() {
            if let Some(rows) = self.tables.get_mut(&table) {
                if let Some(position) = rows.iter().rposition(|row| row.key == key) {
                    rows.remove(position);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnType, TextMatch};

    fn record_table() -> TableSchema {
        TableSchema::new("record")
            .required_column("control_number", ColumnType::Text)
            .column("title", ColumnType::Text)
            .unique(["control_number"])
    }

    fn topic_table() -> TableSchema {
        TableSchema::new("topic")
            .column("record_id", ColumnType::Integer)
            .column("term", ColumnType::Text)
            .foreign_key("record_id", "record")
            .unique(["term"])
    }

    #[test]
    fn test_insert_generates_sequential_keys() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        let a = store.insert(&table, &Row::new().with("control_number", "a")).unwrap();
        let b = store.insert(&table, &Row::new().with("control_number", "b")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.row_count("record"), 2);
    }

    #[test]
    fn test_unique_violation() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        store.insert(&table, &Row::new().with("control_number", "a")).unwrap();
        let err = store.insert(&table, &Row::new().with("control_number", "a")).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_null_never_conflicts() {
        let mut store = MemoryBackend::new();
        let table = topic_table();
        store.insert(&table, &Row::new()).unwrap();
        store.insert(&table, &Row::new()).unwrap();
        assert_eq!(store.row_count("topic"), 2);
    }

    #[test]
    fn test_not_null_violation() {
        let mut store = MemoryBackend::new();
        let err = store
            .insert(&record_table(), &Row::new().with("title", "Untitled"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotNull { column: Some(ref c), .. } if c == "control_number"));
    }

    #[test]
    fn test_foreign_key_violation() {
        let mut store = MemoryBackend::new();
        let err = store
            .insert(&topic_table(), &Row::new().with("record_id", 99i64).with("term", "Rivers"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey { .. }));
    }

    #[test]
    fn test_rollback_restores_rows_but_not_sequence() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        store.begin().unwrap();
        store.insert(&table, &Row::new().with("control_number", "a")).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.row_count("record"), 0);

        let key = store.insert(&table, &Row::new().with("control_number", "a")).unwrap();
        assert_eq!(key, 2);
    }

    #[test]
    fn test_nested_transactions() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        store.begin().unwrap();
        store.insert(&table, &Row::new().with("control_number", "outer")).unwrap();
        store.begin().unwrap();
        store.insert(&table, &Row::new().with("control_number", "inner")).unwrap();
        store.rollback().unwrap();
        store.commit().unwrap();

        assert_eq!(store.row_count("record"), 1);
        assert_eq!(store.open_transactions(), 0);
        assert!(store.commit().is_err());
    }

    #[test]
    fn test_outer_rollback_undoes_committed_savepoint() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        store.insert(&table, &Row::new().with("control_number", "kept")).unwrap();

        store.begin().unwrap();
        store.insert(&table, &Row::new().with("control_number", "outer")).unwrap();
        store.begin().unwrap();
        store.insert(&table, &Row::new().with("control_number", "inner")).unwrap();
        store.commit().unwrap();
        store.rollback().unwrap();

        let keys: Vec<_> = store.rows("record").iter().map(|row| row.key).collect();
        assert_eq!(keys, vec![1]);
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn test_rollback_keeps_rows_of_other_tables() {
        let mut store = MemoryBackend::new();
        let record = record_table();
        let topic = topic_table();
        let key = store.insert(&record, &Row::new().with("control_number", "a")).unwrap();

        store.begin().unwrap();
        store.insert(&topic, &Row::new().with("record_id", key).with("term", "Rivers")).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.row_count("record"), 1);
        assert_eq!(store.row_count("topic"), 0);
    }

    #[test]
    fn test_find_first_match_by_key() {
        let mut store = MemoryBackend::new();
        let table = record_table();
        store.insert(&table, &Row::new().with("control_number", "a").with("title", "Rivers of Europe")).unwrap();
        store.insert(&table, &Row::new().with("control_number", "b").with("title", "Rivers")).unwrap();

        let contains = Filter::new().text("title", "RIVERS", TextMatch::Contains);
        assert_eq!(store.find(&table, &contains).unwrap(), Some(1));

        let exact = Filter::new().text("title", "rivers", TextMatch::Exact);
        assert_eq!(store.find(&table, &exact).unwrap(), Some(2));

        let none = Filter::new().equals("control_number", Value::from("z"));
        assert_eq!(store.find(&table, &none).unwrap(), None);
    }
}
