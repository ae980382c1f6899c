//! Static table schema registry.
//!
//! The physical schema is supplied as a YAML document and loaded once at
//! startup:
//!
//! ```yaml
//! tables:
//!   record:
//!     primary_key: id
//!     columns:
//!       control_number: { type: text, nullable: false }
//!       title: text
//!     unique:
//!       - [control_number]
//!   topic:
//!     columns:
//!       record_id: integer
//!       term: text
//!     foreign_keys:
//!       record_id: record
//!     unique:
//!       - [term]
//! ```
//!
//! The primary key defaults to `id` and is added as a non-nullable integer
//! column when not listed.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{SpecError, StoreError};
use crate::store::value::{ColumnType, Row, Value};

/// A declared column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RawColumn")]
pub struct ColumnDef {
    pub column_type: ColumnType,
    pub nullable: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumn {
    Short(ColumnType),
    Full {
        #[serde(rename = "type")]
        column_type: ColumnType,
        #[serde(default = "default_nullable")]
        nullable: bool,
    },
}

fn default_nullable() -> bool {
    true
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl From<RawColumn> for ColumnDef {
    fn from(raw: RawColumn) -> Self {
        match raw {
            RawColumn::Short(column_type) => ColumnDef {
                column_type,
                nullable: true,
            },
            RawColumn::Full {
                column_type,
                nullable,
            } => ColumnDef {
                column_type,
                nullable,
            },
        }
    }
}

/// Columns, surrogate key, foreign keys and uniqueness constraints of one table
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    #[serde(skip)]
    name: String,

    #[serde(default = "default_primary_key")]
    primary_key: String,

    #[serde(default)]
    columns: IndexMap<String, ColumnDef>,

    /// column -> referenced table
    #[serde(default)]
    foreign_keys: IndexMap<String, String>,

    #[serde(default)]
    unique: Vec<Vec<String>>,
}

impl TableSchema {
    /// Create an empty table with an integer `id` primary key
    pub fn new(name: impl Into<String>) -> Self {
        let mut table = Self {
            name: name.into(),
            primary_key: default_primary_key(),
            columns: IndexMap::new(),
            foreign_keys: IndexMap::new(),
            unique: Vec::new(),
        };
        table.ensure_primary_key();
        table
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(
            name.into(),
            ColumnDef {
                column_type,
                nullable: true,
            },
        );
        self
    }

    pub fn required_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(
            name.into(),
            ColumnDef {
                column_type,
                nullable: false,
            },
        );
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>, table: impl Into<String>) -> Self {
        self.foreign_keys.insert(column.into(), table.into());
        self
    }

    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.unique.push(columns.into_iter().map(Into::into).collect());
        self
    }

    fn ensure_primary_key(&mut self) {
        if !self.columns.contains_key(&self.primary_key) {
            self.columns.shift_insert(
                0,
                self.primary_key.clone(),
                ColumnDef {
                    column_type: ColumnType::Integer,
                    nullable: false,
                },
            );
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnDef)> {
        self.columns.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).map(|def| def.column_type)
    }

    /// Table referenced by `column`, if it is a foreign key
    pub fn referenced_table(&self, column: &str) -> Option<&str> {
        self.foreign_keys.get(column).map(String::as_str)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.foreign_keys
            .iter()
            .map(|(column, table)| (column.as_str(), table.as_str()))
    }

    pub fn unique_constraints(&self) -> &[Vec<String>] {
        &self.unique
    }

    /// Coerce every value of `row` to its declared column type.
    ///
    /// Fails on columns the table does not declare and on values the column
    /// type cannot represent.
    pub fn coerce_row(&self, row: &Row) -> Result<Vec<(String, Value)>, StoreError> {
        row.iter()
            .map(|(column, value)| {
                let def = self.columns.get(column).ok_or_else(|| StoreError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                })?;
                let coerced =
                    value
                        .coerce(def.column_type)
                        .ok_or_else(|| StoreError::TypeMismatch {
                            table: self.name.clone(),
                            column: column.to_string(),
                            expected: def.column_type,
                            value: value.to_string(),
                        })?;
                Ok((column.to_string(), coerced))
            })
            .collect()
    }
}

/// Registry of every table the loader may write, keyed by table name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: IndexMap<String, TableSchema>,
}

#[derive(Deserialize)]
struct SchemaDocument {
    tables: IndexMap<String, TableSchema>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a schema document from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SpecError> {
        let document: SchemaDocument = serde_yaml::from_str(contents)?;
        let mut registry = Self::new();
        for (name, mut table) in document.tables {
            table.name = name;
            table.ensure_primary_key();
            registry.tables.insert(table.name.clone(), table);
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Add a table built in code; the registry must be re-validated afterwards
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Check identifiers and that every constraint refers to declared columns and tables
    pub fn validate(&self) -> Result<(), SpecError> {
        let ident = identifier_pattern();
        for table in self.tables.values() {
            if !ident.is_match(&table.name) {
                return Err(SpecError::InvalidSchema(format!(
                    "invalid table name '{}'",
                    table.name
                )));
            }
            for column in table.columns.keys() {
                if !ident.is_match(column) {
                    return Err(SpecError::InvalidSchema(format!(
                        "table '{}': invalid column name '{}'",
                        table.name, column
                    )));
                }
            }
            for (column, target) in &table.foreign_keys {
                if !table.has_column(column) {
                    return Err(SpecError::InvalidSchema(format!(
                        "table '{}': foreign key on undeclared column '{}'",
                        table.name, column
                    )));
                }
                if !self.tables.contains_key(target) {
                    return Err(SpecError::InvalidSchema(format!(
                        "table '{}': column '{}' references unknown table '{}'",
                        table.name, column, target
                    )));
                }
            }
            for constraint in &table.unique {
                if constraint.is_empty() {
                    return Err(SpecError::InvalidSchema(format!(
                        "table '{}': empty uniqueness constraint",
                        table.name
                    )));
                }
                if let Some(missing) = constraint.iter().find(|c| !table.has_column(c)) {
                    return Err(SpecError::InvalidSchema(format!(
                        "table '{}': uniqueness constraint on undeclared column '{}'",
                        table.name, missing
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
tables:
  record:
    columns:
      control_number: { type: text, nullable: false }
      title: text
    unique:
      - [control_number]
  topic:
    primary_key: topic_id
    columns:
      record_id: integer
      term: text
    foreign_keys:
      record_id: record
    unique:
      - [term]
"#;

    #[test]
    fn test_load_schema() {
        let registry = SchemaRegistry::from_yaml_str(SCHEMA).unwrap();
        let names: Vec<&str> = registry.table_names().collect();
        assert_eq!(names, vec!["record", "topic"]);

        let record = registry.get("record").unwrap();
        assert_eq!(record.name(), "record");
        assert_eq!(record.primary_key(), "id");
        assert_eq!(record.column_type("id"), Some(ColumnType::Integer));
        assert!(!record.get_column("control_number").unwrap().nullable);
        assert!(record.get_column("title").unwrap().nullable);

        let topic = registry.get("topic").unwrap();
        assert_eq!(topic.primary_key(), "topic_id");
        assert_eq!(topic.referenced_table("record_id"), Some("record"));
        assert_eq!(topic.unique_constraints(), &[vec!["term".to_string()]]);
    }

    #[test]
    fn test_reject_unknown_fk_target() {
        let yaml = r#"
tables:
  topic:
    columns: { record_id: integer }
    foreign_keys: { record_id: record }
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown table 'record'"));
    }

    #[test]
    fn test_reject_bad_identifier() {
        let yaml = r#"
tables:
  "record; drop table x":
    columns: { title: text }
"#;
        assert!(SchemaRegistry::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_coerce_row() {
        let table = TableSchema::new("topic")
            .column("record_id", ColumnType::Integer)
            .column("term", ColumnType::Text);

        let row = Row::new().with("record_id", "12").with("term", "Rivers");
        let coerced = table.coerce_row(&row).unwrap();
        assert_eq!(coerced[0], ("record_id".to_string(), Value::Integer(12)));

        let bad = Row::new().with("record_id", "twelve");
        assert!(matches!(
            table.coerce_row(&bad),
            Err(StoreError::TypeMismatch { .. })
        ));

        let unknown = Row::new().with("color", "red");
        assert!(matches!(
            table.coerce_row(&unknown),
            Err(StoreError::UnknownColumn { .. })
        ));
    }
}
