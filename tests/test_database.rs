//! Integration tests against a live PostgreSQL database
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`. The tests
//! create and drop their own tables.

#![cfg(feature = "postgres")]

use bibload::store::{Backend, ColumnType, Filter, Row, TextMatch};
use bibload::{Database, DatabaseConfig, Field, LoaderSpec, MergeOrInsert, Record, RecursiveLoader, SchemaRegistry, TableSchema};
use diesel::prelude::*;

const DDL: &[&str] = &[
    "DROP TABLE IF EXISTS bibload_test_topic",
    "DROP TABLE IF EXISTS bibload_test_record",
    "CREATE TABLE bibload_test_record (id BIGSERIAL PRIMARY KEY, control_number TEXT NOT NULL UNIQUE, title TEXT)",
    "CREATE TABLE bibload_test_topic (id BIGSERIAL PRIMARY KEY, record_id BIGINT REFERENCES bibload_test_record(id), term TEXT NOT NULL UNIQUE)",
];

fn database() -> Database {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    let database = Database::new_with_config(
        &url,
        DatabaseConfig {
            max_connections: 2,
            min_idle: 1,
            ..DatabaseConfig::default()
        },
    )
    .expect("Failed to connect");

    let mut conn = database.get_connection().expect("Failed to get connection");
    for statement in DDL {
        diesel::sql_query(*statement).execute(&mut conn).expect("Failed to prepare tables");
    }
    database
}

fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_table(
            TableSchema::new("bibload_test_record")
                .required_column("control_number", ColumnType::Text)
                .column("title", ColumnType::Text)
                .unique(["control_number"]),
        )
        .with_table(
            TableSchema::new("bibload_test_topic")
                .column("record_id", ColumnType::Integer)
                .required_column("term", ColumnType::Text)
                .foreign_key("record_id", "bibload_test_record")
                .unique(["term"]),
        )
}

#[test]
#[ignore]
fn test_insert_and_find() {
    let database = database();
    let mut backend = database.backend().unwrap();
    let schemas = schemas();
    let table = schemas.get("bibload_test_record").unwrap();

    let key = backend
        .insert(table, &Row::new().with("control_number", "ocm1").with("title", "Rivers of Europe"))
        .unwrap();
    let err = backend.insert(table, &Row::new().with("control_number", "ocm1")).unwrap_err();
    assert!(err.is_unique_violation());

    let found = backend
        .find(table, &Filter::new().text("title", "RIVERS", TextMatch::Contains))
        .unwrap();
    assert_eq!(found, Some(key));
}

#[test]
#[ignore]
fn test_load_twice_is_idempotent() {
    let database = database();
    let spec = LoaderSpec::from_yaml_str(
        r#"
mapping:
  bibload_test_record.control_number: "001"
  bibload_test_record.title: "245$a"
  +topics:
    bibload_test_topic.record_id: bibload_test_record.id
    bibload_test_topic.term: "650$a"
"#,
    )
    .unwrap();
    let schemas = schemas();
    spec.validate_against(&schemas).unwrap();

    let record = Record::new()
        .with_field(Field::control("001", "ocm1"))
        .with_field(Field::data("245").subfield('a', "Bridges"))
        .with_field(Field::data("650").subfield('a', "Bridges"))
        .with_field(Field::data("650").subfield('a', "Rivers"));

    let store = MergeOrInsert::new(database.backend().unwrap(), schemas);
    let mut loader = RecursiveLoader::new(&spec, store);
    let first = loader.load_record(&record).unwrap();
    let second = loader.load_record(&record).unwrap();
    assert_eq!(first.rows_created, 3);
    assert_eq!(second.rows_created, 0);
    assert_eq!(second.rows_reused, 3);
}
