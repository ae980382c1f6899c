//! Diesel ORM runtime infrastructure
//!
//! This module provides database connection pooling and a [`Backend`]
//! implementation that writes loader rows through Diesel.
//!
//! # Features
//!
//! - `postgres` (default): PostgreSQL connections
//! - `mysql`: MySQL connections, used when `postgres` is disabled
//!
//! [`Backend`]: crate::store::Backend

pub mod backend;
pub mod database;

// Re-export key types
pub use backend::{find_statement, insert_statement, DieselBackend, Statement};
pub use database::{Database, DatabaseConfig, DbConnection, Pool, PooledConnection};
