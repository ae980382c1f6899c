//! Persistence layer: schema registry, backend trait and merge-or-insert.
//!
//! A [`Backend`] is the transactional store the loader writes to. It only has
//! to insert rows, find a row by filter and scope work in (possibly nested)
//! transactions. [`MergeOrInsert`] builds the idempotent upsert on top.

pub mod memory;
pub mod schema;
pub mod upsert;
pub mod value;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::{MemoryBackend, StoredRow};
pub use schema::{ColumnDef, SchemaRegistry, TableSchema};
pub use upsert::{MergeOrInsert, Upserted};
pub use value::{ColumnType, Row, Value};

/// Surrogate primary key generated by the store
pub type PrimaryKey = i64;

/// How text columns are compared when looking up the row behind a conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Case-insensitive substring match
    #[default]
    Contains,
    /// Case-insensitive equality
    Exact,
}

impl TextMatch {
    pub fn matches(&self, haystack: &str, needle: &str) -> bool {
        let haystack = haystack.to_lowercase();
        let needle = needle.to_lowercase();
        match self {
            TextMatch::Contains => haystack.contains(&needle),
            TextMatch::Exact => haystack == needle,
        }
    }
}

/// Predicate on a single column
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    Text { needle: String, mode: TextMatch },
}

/// Conjunction of column conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, column: impl Into<String>, value: Value) -> Self {
        self.conditions.push((column.into(), Condition::Equals(value)));
        self
    }

    pub fn text(mut self, column: impl Into<String>, needle: impl Into<String>, mode: TextMatch) -> Self {
        self.conditions.push((
            column.into(),
            Condition::Text {
                needle: needle.into(),
                mode,
            },
        ));
        self
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(column, condition)| (column.as_str(), condition))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Transactional row store.
///
/// `begin` may be called while a transaction is already open; the inner
/// scope then behaves like a savepoint: its `rollback` undoes only the work
/// done since the matching `begin`.
pub trait Backend {
    /// Insert `row` and return the generated primary key.
    ///
    /// A declared uniqueness constraint violation must be reported as
    /// [`StoreError::UniqueViolation`].
    fn insert(&mut self, table: &TableSchema, row: &Row) -> Result<PrimaryKey, StoreError>;

    /// Primary key of the first row (by ascending key) matching `filter`
    fn find(&mut self, table: &TableSchema, filter: &Filter) -> Result<Option<PrimaryKey>, StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;
}
