//! # bibload: Configuration-Driven Catalogue Record Loader
//!
//! bibload materializes tag-addressed catalogue records (MARC-like: repeatable
//! fields with single-character subfields) into a relational store. What goes
//! where is declared in a YAML loader spec: a tree of nodes, each bound to one
//! table, whose columns are filled from tag references, literals or the keys of
//! enclosing rows.
//!
//! ## Features
//!
//! - **Recursive loading**: child nodes are applied to every occurrence of the field their parent fans out over
//! - **Foreign key scoping**: a child row sees the key of its nearest enclosing row of each table
//! - **Merge-or-insert**: re-loading the same data reuses existing rows instead of duplicating them
//! - **Pluggable stores**: an in-memory store for dry runs and tests, Diesel for PostgreSQL or MySQL
//!
//! ## Example: Loader Spec
//!
//! ```yaml
//! config:
//!   field_delimiter: "$"
//! mapping:
//!   record.control_number: "001"
//!   record.title: "245$a"
//!   +subjects:
//!     topic.record_id: record.id
//!     topic.term: "650$a"
//!     topic.source: { literal: lcsh }
//!     ~topic.image: null
//! ```
//!
//! ## Example: Loading
//!
//! ```ignore
//! use bibload::{LoaderSpec, MemoryBackend, MergeOrInsert, RecursiveLoader, SchemaRegistry};
//!
//! let spec = LoaderSpec::load_from_file("config/loader.yaml")?;
//! let schemas = SchemaRegistry::load_from_file("config/schema.yaml")?;
//! spec.validate_against(&schemas)?;
//!
//! let store = MergeOrInsert::new(MemoryBackend::new(), schemas);
//! let mut loader = RecursiveLoader::new(&spec, store);
//! let report = loader.load_records(&bibload::reader::read_records("records.json")?)?;
//! ```

// Core modules
pub mod error;
pub mod reader;
pub mod record;

// Loader runtime: spec, foreign key context, materialization, recursion
pub mod runtime;

// Persistence: schema, backends, merge-or-insert
pub mod store;

// Diesel ORM runtime infrastructure
pub mod diesel_runtime;

// Re-export key types
pub use error::{LoadError, ReadError, SpecError, StoreError};
pub use record::{Field, Record, RecordNode, Tag, TagResolver};

// Re-export runtime types
pub use runtime::{
    BatchReport, ErrorPolicy, ForeignKeyContext, LoaderConfig, LoaderNode, LoaderOptions, LoaderSpec, LoadStats,
    RecursiveLoader, SourceExpr, TransactionScope,
};

// Re-export store types
pub use store::{Backend, MemoryBackend, MergeOrInsert, Row, SchemaRegistry, TableSchema, TextMatch, Value};

// Re-export diesel_runtime types
pub use diesel_runtime::{Database, DatabaseConfig, DieselBackend};
