//! Merge-or-insert persistence.
//!
//! Every upsert runs in its own session: the insert is attempted inside a
//! transaction, which is committed on success and rolled back on any failure.
//! A uniqueness violation is then turned into a lookup of the row that caused
//! it. Every other failure is returned to the caller.

use tracing::{debug, warn};

use crate::error::{LoadError, StoreError};
use crate::store::{Backend, ColumnType, Filter, PrimaryKey, Row, SchemaRegistry, TableSchema, TextMatch};

/// Outcome of an upsert: exactly one key, either new or reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub key: PrimaryKey,
    pub created: bool,
}

/// Transaction scope that rolls back when dropped without commit
struct Session<'b, B: Backend> {
    backend: &'b mut B,
    open: bool,
}

impl<'b, B: Backend> Session<'b, B> {
    fn begin(backend: &'b mut B) -> Result<Self, StoreError> {
        backend.begin()?;
        Ok(Self { backend, open: true })
    }

    fn insert(&mut self, table: &TableSchema, row: &Row) -> Result<PrimaryKey, StoreError> {
        self.backend.insert(table, row)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.backend.commit()
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.backend.rollback()
    }
}

impl<B: Backend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.backend.rollback() {
                warn!(error = %err, "rollback of abandoned session failed");
            }
        }
    }
}

/// Idempotent row persistence over a [`Backend`]
#[derive(Debug)]
pub struct MergeOrInsert<B: Backend> {
    backend: B,
    schemas: SchemaRegistry,
    text_match: TextMatch,
}

impl<B: Backend> MergeOrInsert<B> {
    /// Create a store writing through `backend`.
    ///
    /// # Arguments
    /// * `backend` - Where rows are inserted and looked up
    /// * `schemas` - Tables the store may write to; upserts into other tables fail
    ///
    /// # Example
    /// ```
    /// use bibload::store::ColumnType;
    /// use bibload::{MemoryBackend, MergeOrInsert, Row, SchemaRegistry, TableSchema};
    ///
    /// let schemas = SchemaRegistry::new().with_table(
    ///     TableSchema::new("topic")
    ///         .required_column("term", ColumnType::Text)
    ///         .unique(["term"]),
    /// );
    /// let mut store = MergeOrInsert::new(MemoryBackend::new(), schemas);
    /// let first = store.upsert("topic", &Row::new().with("term", "Rivers")).unwrap();
    /// let again = store.upsert("topic", &Row::new().with("term", "Rivers")).unwrap();
    /// assert_eq!(first.key, again.key);
    /// assert!(!again.created);
    /// ```
    pub fn new(backend: B, schemas: SchemaRegistry) -> Self {
        Self {
            backend,
            schemas,
            text_match: TextMatch::default(),
        }
    }

    pub fn with_text_match(mut self, text_match: TextMatch) -> Self {
        self.text_match = text_match;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Persist `row` into `table` and return its primary key.
    ///
    /// On a uniqueness violation the failed insert is rolled back and the key
    /// of the first existing row matching any of the table's uniqueness
    /// constraints is returned instead.
    pub fn upsert(&mut self, table: &str, row: &Row) -> Result<Upserted, LoadError> {
        let schema = self
            .schemas
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;

        let mut session = Session::begin(&mut self.backend)?;
        match session.insert(schema, row) {
            Ok(key) => {
                session.commit()?;
                debug!(table, key, "inserted row");
                Ok(Upserted { key, created: true })
            }
            Err(err) if err.is_unique_violation() => {
                session.rollback()?;
                debug!(table, error = %err, "insert conflicted, looking up existing row");
                let key = find_existing(&mut self.backend, schema, row, self.text_match)?;
                Ok(Upserted { key, created: false })
            }
            Err(err) => {
                session.rollback()?;
                Err(err.into())
            }
        }
    }

    /// Open an enclosing transaction; upserts inside it become savepoints
    pub fn begin(&mut self) -> Result<(), StoreError> {
        self.backend.begin()
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.backend.commit()
    }

    pub fn rollback(&mut self) -> Result<(), StoreError> {
        self.backend.rollback()
    }
}

/// Lookup filter for one uniqueness constraint.
///
/// `None` when the row leaves a constrained column empty: such a row cannot
/// have violated that constraint.
fn constraint_filter(schema: &TableSchema, constraint: &[String], row: &Row, text_match: TextMatch) -> Option<Filter> {
    let mut filter = Filter::new();
    for column in constraint {
        let value = row.get(column)?;
        let column_type = schema.column_type(column)?;
        filter = match column_type {
            ColumnType::Text => filter.text(column.as_str(), value.to_string(), text_match),
            other => filter.equals(column.as_str(), value.coerce(other)?),
        };
    }
    Some(filter)
}

fn find_existing<B: Backend>(
    backend: &mut B,
    schema: &TableSchema,
    row: &Row,
    text_match: TextMatch,
) -> Result<PrimaryKey, LoadError> {
    for constraint in schema.unique_constraints() {
        let Some(filter) = constraint_filter(schema, constraint, row, text_match) else {
            continue;
        };
        if let Some(key) = backend.find(schema, &filter)? {
            debug!(table = schema.name(), key, constraint = %constraint.join(", "), "reusing existing row");
            return Ok(key);
        }
    }
    Err(LoadError::UnmatchedConflict {
        table: schema.name().to_string(),
    })
}
