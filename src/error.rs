//! Error types for record reading, loader specs, persistence and loading.
//!
//! Tag resolution never fails: a missing field or subfield is `None`.
//! Uniqueness violations are recovered inside the upsert and only escape as
//! [`LoadError::UnmatchedConflict`] when no existing row can be found.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::ColumnType;

/// Failure reading an input record file
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {index}: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Failure loading or validating a loader spec or a schema document.
///
/// Always raised before any record is processed.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("node '{node}': invalid key '{key}': {reason}")]
    InvalidKey {
        node: String,
        key: String,
        reason: String,
    },

    #[error("node '{node}': invalid value for '{key}': {reason}")]
    InvalidValue {
        node: String,
        key: String,
        reason: String,
    },

    #[error("node '{node}': column '{column}' targets table '{found}' but the node binds table '{expected}'")]
    TableMismatch {
        node: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("node '{node}': column '{column}' references table '{table}', which is not bound by any enclosing node")]
    DanglingForeignKey {
        node: String,
        column: String,
        table: String,
    },

    #[error("node '{node}': column '{column}' reads '{tag}', but the node is applied to single '{field}' field occurrences")]
    TagOutOfScope {
        node: String,
        column: String,
        tag: String,
        field: String,
    },

    #[error("node '{node}': unknown table '{table}'")]
    UnknownTable { node: String, table: String },

    #[error("node '{node}': table '{table}' has no column '{column}'")]
    UnknownColumn {
        node: String,
        table: String,
        column: String,
    },

    #[error("node '{node}': column '{column}' references '{table}.{referenced}', but the primary key of '{table}' is '{primary_key}'")]
    NotPrimaryKey {
        node: String,
        column: String,
        table: String,
        referenced: String,
        primary_key: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Failure reported by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{table}': uniqueness violation{}", .constraint.as_ref().map(|c| format!(" on ({})", c)).unwrap_or_default())]
    UniqueViolation {
        table: String,
        constraint: Option<String>,
    },

    #[error("table '{table}': null value in non-nullable column '{}'", .column.as_deref().unwrap_or("?"))]
    NotNull {
        table: String,
        column: Option<String>,
    },

    #[error("table '{table}': foreign key violation{}", .column.as_ref().map(|c| format!(" on column '{}'", c)).unwrap_or_default())]
    ForeignKey {
        table: String,
        column: Option<String>,
    },

    #[error("table '{table}': column '{column}' expects {expected}, got '{value}'")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
        value: String,
    },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("table '{table}': unknown column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("query failed{}: {message}", .table.as_ref().map(|t| format!(" on table '{}'", t)).unwrap_or_default())]
    Query {
        table: Option<String>,
        message: String,
    },
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Failure while loading records
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A uniqueness violation for which no existing row matched
    #[error("table '{table}': insert conflicted but no existing row matches")]
    UnmatchedConflict { table: String },

    #[error("record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<LoadError>,
    },
}

impl LoadError {
    /// Index of the failing top-level record, when known
    pub fn record_index(&self) -> Option<usize> {
        match self {
            LoadError::Record { index, .. } => Some(*index),
            _ => None,
        }
    }
}
