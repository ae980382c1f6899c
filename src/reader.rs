//! Reading records from MARC-in-JSON files.
//!
//! Accepted layouts:
//!
//! - a single record object `{"leader": ..., "fields": [...]}`
//! - an array of such record objects
//! - a single record as an array of one-key field objects (MARCJSON)
//! - an array of MARCJSON records
//! - newline-delimited JSON, one record per line, in any of the above
//!
//! Inside a field list, a control field is `{"001": "value"}` and a data
//! field is `{"650": {"ind1": " ", "ind2": "0", "subfields": [{"a": "..."}]}}`.
//! The leader carries nothing the loader can bind to and is skipped.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ReadError;
use crate::record::{Field, Record};

/// Read every record of a MARC-in-JSON file, in file order
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, ReadError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let records = match serde_json::from_str::<Value>(&contents) {
        Ok(document) => parse_document(&document)?,
        Err(_) => {
            // Not one document; fall back to one document per line
            let mut records = Vec::new();
            for line in contents.lines().map(str::trim).filter(|line| !line.is_empty()) {
                let document: Value = serde_json::from_str(line).map_err(|source| ReadError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                let offset = records.len();
                records.extend(parse_document(&document).map_err(|e| shift_index(e, offset))?);
            }
            records
        }
    };

    info!(path = %path.display(), count = records.len(), "read records");
    Ok(records)
}

/// Parse records out of an already decoded JSON document
pub fn parse_document(document: &Value) -> Result<Vec<Record>, ReadError> {
    match document {
        Value::Object(object) if object.contains_key("fields") => Ok(vec![parse_record_object(0, object)?]),
        Value::Array(items) if is_field_list(items) => Ok(vec![parse_field_list(0, items)?]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_record(index, item))
            .collect(),
        _ => Err(ReadError::Malformed {
            index: 0,
            reason: "expected a record object or an array of records".to_string(),
        }),
    }
}

fn parse_record(index: usize, item: &Value) -> Result<Record, ReadError> {
    match item {
        Value::Object(object) => parse_record_object(index, object),
        Value::Array(fields) => parse_field_list(index, fields),
        _ => Err(malformed(index, "record must be an object or an array of fields")),
    }
}

fn parse_record_object(index: usize, object: &Map<String, Value>) -> Result<Record, ReadError> {
    let fields = object
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(index, "record object has no 'fields' array"))?;
    parse_field_list(index, fields)
}

fn parse_field_list(index: usize, items: &[Value]) -> Result<Record, ReadError> {
    let mut record = Record::new();
    for item in items {
        let object = item
            .as_object()
            .ok_or_else(|| malformed(index, "field must be an object"))?;
        for (tag, value) in object {
            if tag == "leader" {
                continue;
            }
            record.add_field(parse_field(index, tag, value)?);
        }
    }
    debug!(index, fields = record.fields().len(), "parsed record");
    Ok(record)
}

fn parse_field(index: usize, tag: &str, value: &Value) -> Result<Field, ReadError> {
    match value {
        Value::String(text) => Ok(Field::control(tag, text.as_str())),
        Value::Number(number) => Ok(Field::control(tag, number.to_string())),
        Value::Object(body) => {
            let mut field = Field::data(tag);
            let subfields = body.get("subfields").and_then(Value::as_array);
            for subfield in subfields.into_iter().flatten() {
                let subfield = subfield
                    .as_object()
                    .ok_or_else(|| malformed(index, &format!("field {tag}: subfield must be an object")))?;
                for (code, value) in subfield {
                    let mut chars = code.chars();
                    let (Some(code_char), None) = (chars.next(), chars.next()) else {
                        return Err(malformed(
                            index,
                            &format!("field {tag}: subfield code '{code}' must be a single character"),
                        ));
                    };
                    let Some(value) = value.as_str() else {
                        continue;
                    };
                    field.add_subfield(code_char, value);
                }
            }
            Ok(field)
        }
        _ => Err(malformed(index, &format!("field {tag} must be a string or an object"))),
    }
}

/// An array is a single MARCJSON record when its items are one-key field objects
fn is_field_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            item.as_object()
                .is_some_and(|object| object.len() == 1 && !object.contains_key("fields"))
        })
}

fn malformed(index: usize, reason: &str) -> ReadError {
    ReadError::Malformed {
        index,
        reason: reason.to_string(),
    }
}

fn shift_index(err: ReadError, offset: usize) -> ReadError {
    match err {
        ReadError::Malformed { index, reason } => ReadError::Malformed {
            index: index + offset,
            reason,
        },
        other => other,
    }
}
