//! Column values, column types and candidate rows.

use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;

/// A scalar column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Value {
    /// Convert to the representation a column of type `ty` stores.
    ///
    /// Returns `None` when the value cannot be represented, e.g. `"abc"` for
    /// an integer column.
    pub fn coerce(&self, ty: ColumnType) -> Option<Value> {
        match (ty, self) {
            (ColumnType::Text, Value::Text(s)) => Some(Value::Text(s.clone())),
            (ColumnType::Text, other) => Some(Value::Text(other.to_string())),

            (ColumnType::Integer, Value::Integer(i)) => Some(Value::Integer(*i)),
            (ColumnType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Integer),
            (ColumnType::Integer, Value::Float(f)) if f.fract() == 0.0 => {
                Some(Value::Integer(*f as i64))
            }
            (ColumnType::Integer, _) => None,

            (ColumnType::Float, Value::Float(f)) => Some(Value::Float(*f)),
            (ColumnType::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
            (ColumnType::Float, Value::Boolean(_)) => None,

            (ColumnType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(*b)),
            (ColumnType::Boolean, Value::Integer(0)) => Some(Value::Boolean(false)),
            (ColumnType::Boolean, Value::Integer(1)) => Some(Value::Boolean(true)),
            (ColumnType::Boolean, Value::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(Value::Boolean(true)),
                "false" | "f" | "no" | "n" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            (ColumnType::Boolean, _) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "string", alias = "varchar")]
    Text,
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    #[serde(alias = "double", alias = "real")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A candidate row: column name to value, in binding order.
///
/// Columns whose source resolved to nothing are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(column, value)| (column.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
