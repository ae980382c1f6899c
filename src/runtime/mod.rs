//! Loader runtime.
//!
//! This module turns a [`LoaderSpec`] and a stream of records into rows: it
//! evaluates bindings against record nodes, tracks the keys of enclosing
//! rows and drives the recursive descent.

pub mod context;
pub mod loader;
pub mod materialize;
pub mod progress;
pub mod spec;

// Re-export key types
pub use context::{ForeignKeyContext, Frame};
pub use loader::{
    fan_out, BatchReport, ErrorPolicy, LoadStats, LoaderOptions, RecordFailure, RecursiveLoader, TransactionScope,
};
pub use materialize::{evaluate, materialize};
pub use progress::{Progress, ProgressLine};
pub use spec::{LoaderConfig, LoaderNode, LoaderSpec, SourceExpr, ROOT_NODE};
