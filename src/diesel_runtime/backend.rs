//! [`Backend`] over a pooled Diesel connection.
//!
//! Statements are built as raw SQL from the table schema with bound
//! parameters. Identifiers come from a validated [`SchemaRegistry`] and are
//! quoted; values are always bound, never inlined.
//!
//! [`SchemaRegistry`]: crate::store::SchemaRegistry

use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::prelude::*;
use diesel::query_builder::BoxedSqlQuery;
use diesel::query_builder::SqlQuery;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Bool, Double, Text};
use tracing::trace;

use super::database::{DbConnection, PooledConnection};
use crate::error::StoreError;
use crate::store::{Backend, Condition, Filter, PrimaryKey, Row, TableSchema, TextMatch, Value};

#[cfg(feature = "postgres")]
type Db = diesel::pg::Pg;
#[cfg(all(feature = "mysql", not(feature = "postgres")))]
type Db = diesel::mysql::Mysql;

type Query = BoxedSqlQuery<'static, Db, SqlQuery>;

#[derive(QueryableByName)]
struct KeyRow {
    #[diesel(sql_type = BigInt)]
    pk_value: i64,
}

/// A SQL statement with its bind values in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl Statement {
    fn into_query(self) -> Query {
        let mut query = diesel::sql_query(self.sql).into_boxed::<Db>();
        for value in self.binds {
            query = match value {
                Value::Text(text) => query.bind::<Text, _>(text),
                Value::Integer(number) => query.bind::<BigInt, _>(number),
                Value::Float(number) => query.bind::<Double, _>(number),
                Value::Boolean(flag) => query.bind::<Bool, _>(flag),
            };
        }
        query
    }
}

#[cfg(feature = "postgres")]
fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

#[cfg(all(feature = "mysql", not(feature = "postgres")))]
fn quote(ident: &str) -> String {
    format!("`{ident}`")
}

#[cfg(feature = "postgres")]
fn placeholder(position: usize) -> String {
    format!("${position}")
}

#[cfg(all(feature = "mysql", not(feature = "postgres")))]
fn placeholder(_position: usize) -> String {
    "?".to_string()
}

fn key_expr(table: &TableSchema) -> String {
    #[cfg(feature = "postgres")]
    let cast = "BIGINT";
    #[cfg(all(feature = "mysql", not(feature = "postgres")))]
    let cast = "SIGNED";
    format!("CAST({} AS {cast}) AS pk_value", quote(table.primary_key()))
}

/// Escape LIKE wildcards so the needle matches literally
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `INSERT` of the coerced row; on Postgres it returns the generated key
pub fn insert_statement(table: &TableSchema, values: Vec<(String, Value)>) -> Statement {
    let name = quote(table.name());
    let mut sql = if values.is_empty() {
        #[cfg(feature = "postgres")]
        let sql = format!("INSERT INTO {name} DEFAULT VALUES");
        #[cfg(all(feature = "mysql", not(feature = "postgres")))]
        let sql = format!("INSERT INTO {name} () VALUES ()");
        sql
    } else {
        let columns: Vec<String> = values.iter().map(|(column, _)| quote(column)).collect();
        let params: Vec<String> = (1..=values.len()).map(placeholder).collect();
        format!("INSERT INTO {name} ({}) VALUES ({})", columns.join(", "), params.join(", "))
    };

    #[cfg(feature = "postgres")]
    sql.push_str(&format!(" RETURNING {}", key_expr(table)));

    Statement {
        sql,
        binds: values.into_iter().map(|(_, value)| value).collect(),
    }
}

/// `SELECT` of the lowest key matching every condition of `filter`
pub fn find_statement(table: &TableSchema, filter: &Filter) -> Statement {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    for (column, condition) in filter.conditions() {
        let position = binds.len() + 1;
        match condition {
            Condition::Equals(value) => {
                clauses.push(format!("{} = {}", quote(column), placeholder(position)));
                binds.push(value.clone());
            }
            Condition::Text {
                needle,
                mode: TextMatch::Contains,
            } => {
                clauses.push(format!("LOWER({}) LIKE {}", quote(column), placeholder(position)));
                binds.push(Value::Text(format!("%{}%", escape_like(&needle.to_lowercase()))));
            }
            Condition::Text {
                needle,
                mode: TextMatch::Exact,
            } => {
                clauses.push(format!("LOWER({}) = {}", quote(column), placeholder(position)));
                binds.push(Value::Text(needle.to_lowercase()));
            }
        }
    }

    let predicate = if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    };
    let sql = format!(
        "SELECT {} FROM {} WHERE {predicate} ORDER BY {} ASC LIMIT 1",
        key_expr(table),
        quote(table.name()),
        quote(table.primary_key()),
    );
    Statement { sql, binds }
}

fn map_error(table: &TableSchema, err: DieselError) -> StoreError {
    let name = table.name().to_string();
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => StoreError::UniqueViolation {
            table: name,
            constraint: info.constraint_name().map(str::to_string),
        },
        DieselError::DatabaseError(DatabaseErrorKind::NotNullViolation, info) => StoreError::NotNull {
            table: name,
            column: info.column_name().map(str::to_string),
        },
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => StoreError::ForeignKey {
            table: name,
            column: info.column_name().map(str::to_string),
        },
        other => StoreError::Query {
            table: Some(name),
            message: other.to_string(),
        },
    }
}

fn transaction_error(err: DieselError) -> StoreError {
    StoreError::Transaction(err.to_string())
}

/// Backend bound to one pooled connection
pub struct DieselBackend {
    conn: PooledConnection,
}

impl DieselBackend {
    pub fn new(conn: PooledConnection) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for DieselBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DieselBackend").finish_non_exhaustive()
    }
}

impl Backend for DieselBackend {
    fn insert(&mut self, table: &TableSchema, row: &Row) -> Result<PrimaryKey, StoreError> {
        let statement = insert_statement(table, table.coerce_row(row)?);
        trace!(sql = %statement.sql, "insert");

        #[cfg(feature = "postgres")]
        let key = statement
            .into_query()
            .get_result::<KeyRow>(&mut *self.conn)
            .map_err(|e| map_error(table, e))?
            .pk_value;

        #[cfg(all(feature = "mysql", not(feature = "postgres")))]
        let key = {
            statement
                .into_query()
                .execute(&mut *self.conn)
                .map_err(|e| map_error(table, e))?;
            diesel::sql_query("SELECT CAST(LAST_INSERT_ID() AS SIGNED) AS pk_value")
                .get_result::<KeyRow>(&mut *self.conn)
                .map_err(|e| map_error(table, e))?
                .pk_value
        };

        Ok(key)
    }

    fn find(&mut self, table: &TableSchema, filter: &Filter) -> Result<Option<PrimaryKey>, StoreError> {
        let statement = find_statement(table, filter);
        trace!(sql = %statement.sql, "find");
        let found = statement
            .into_query()
            .get_result::<KeyRow>(&mut *self.conn)
            .optional()
            .map_err(|e| map_error(table, e))?;
        Ok(found.map(|row| row.pk_value))
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        <AnsiTransactionManager as TransactionManager<DbConnection>>::begin_transaction(&mut *self.conn)
            .map_err(transaction_error)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        <AnsiTransactionManager as TransactionManager<DbConnection>>::commit_transaction(&mut *self.conn)
            .map_err(transaction_error)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        <AnsiTransactionManager as TransactionManager<DbConnection>>::rollback_transaction(&mut *self.conn)
            .map_err(transaction_error)
    }
}
