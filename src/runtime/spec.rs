//! Loader specification loader and validation.
//!
//! A loader spec is a YAML document with two sections:
//!
//! ```yaml
//! config:
//!   field_delimiter: "$"
//!   child_prefix: "+"
//!   table_delimiter: "."
//!   deferred_prefix: "~"
//! mapping:
//!   record.control_number: "001"
//!   record.title: "245$a"
//!   record.source: { literal: "catalogue" }
//!   ~record.cover_url: null
//!   +topics:
//!     topic.record_id: record.id
//!     topic.term: "650$a"
//! ```
//!
//! Keys starting with `child_prefix` open a nested loader; every other key is
//! a `table.column` binding, optionally marked deferred. All bindings of one
//! node must target the same table.
//!
//! String values are classified once, at load time: `"FFF"` / `"FFF$S"` with a
//! numeric field code is a tag reference, `"table.column"` is a foreign key
//! reference to an enclosing node's row, anything else is a literal. The
//! explicit forms `{literal: ..}`, `{tag: ..}` and `{fk: ..}` bypass the
//! classification; `null` marks the column deferred.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::SpecError;
use crate::record::Tag;
use crate::store::{SchemaRegistry, TextMatch, Value};

/// Name given to the top-level loader node
pub const ROOT_NODE: &str = "mapping";

/// Syntax settings of a loader spec document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Separates field code and subfield code in tag references
    pub field_delimiter: String,

    /// Marks a key as introducing a child loader
    pub child_prefix: String,

    /// Separates table and column in binding keys and foreign key references
    pub table_delimiter: String,

    /// Marks a column that is left empty for a later enrichment pass
    pub deferred_prefix: String,

    /// Text comparison used when looking up the row behind a uniqueness conflict
    pub text_match: TextMatch,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            field_delimiter: "$".to_string(),
            child_prefix: "+".to_string(),
            table_delimiter: ".".to_string(),
            deferred_prefix: "~".to_string(),
            text_match: TextMatch::default(),
        }
    }
}

impl LoaderConfig {
    fn validate(&self) -> Result<(), SpecError> {
        let settings = [
            ("field_delimiter", &self.field_delimiter),
            ("child_prefix", &self.child_prefix),
            ("table_delimiter", &self.table_delimiter),
            ("deferred_prefix", &self.deferred_prefix),
        ];
        if let Some((name, _)) = settings.iter().find(|(_, value)| value.is_empty()) {
            return Err(SpecError::InvalidConfig(format!("'{}' must not be empty", name)));
        }
        if self.child_prefix == self.deferred_prefix {
            return Err(SpecError::InvalidConfig(
                "'child_prefix' and 'deferred_prefix' must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a column's value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceExpr {
    /// A constant
    Literal(Value),
    /// A field or subfield of the current record node
    TagRef(Tag),
    /// The key of the nearest enclosing row of `table`
    ForeignKeyRef { table: String, column: Option<String> },
    /// Always empty; filled in by a later enrichment pass
    Deferred,
}

/// One level of the mapping tree: zero or one table plus nested children
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderNode {
    name: String,
    table: Option<String>,
    bindings: IndexMap<String, SourceExpr>,
    children: IndexMap<String, LoaderNode>,
    /// Bindings whose table differs from the node's; rejected by validation
    conflicts: Vec<(String, String)>,
}

impl LoaderNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            bindings: IndexMap::new(),
            children: IndexMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Bind `column` of `table`.
    ///
    /// The first binding fixes the node's table. A later binding naming a
    /// different table is kept aside and makes [`LoaderSpec::new`] fail with
    /// [`SpecError::TableMismatch`].
    ///
    /// # Arguments
    /// * `table` - Table the column belongs to
    /// * `column` - Column to fill
    /// * `expr` - Where the value comes from
    ///
    /// # Example
    /// ```
    /// use bibload::{LoaderNode, SourceExpr, Tag};
    ///
    /// let node = LoaderNode::new("topics")
    ///     .with_binding("topic", "term", SourceExpr::TagRef(Tag::new("650", Some('a'))));
    /// assert_eq!(node.table(), Some("topic"));
    /// ```
    pub fn with_binding(mut self, table: impl Into<String>, column: impl Into<String>, expr: SourceExpr) -> Self {
        let table = table.into();
        let column = column.into();
        match self.table.as_deref() {
            None => self.table = Some(table),
            Some(existing) if existing != table => {
                self.conflicts.push((column, table));
                return self;
            }
            Some(_) => {}
        }
        self.bindings.insert(column, expr);
        self
    }

    pub fn with_child(mut self, key: impl Into<String>, child: LoaderNode) -> Self {
        self.children.insert(key.into(), child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target table, shared by all bindings of this node
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn bindings(&self) -> &IndexMap<String, SourceExpr> {
        &self.bindings
    }

    pub fn children(&self) -> &IndexMap<String, LoaderNode> {
        &self.children
    }

    /// Distinct field codes referenced by this node's own bindings
    pub fn referenced_fields(&self) -> BTreeSet<&str> {
        self.bindings
            .values()
            .filter_map(|expr| match expr {
                SourceExpr::TagRef(tag) => Some(tag.field()),
                _ => None,
            })
            .collect()
    }

    /// The field code this node expands over, when it references exactly one
    pub fn fan_out_field(&self) -> Option<&str> {
        let fields = self.referenced_fields();
        if fields.len() == 1 {
            fields.into_iter().next()
        } else {
            None
        }
    }
}

/// Validated, immutable loader specification
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderSpec {
    config: LoaderConfig,
    root: LoaderNode,
}

#[derive(Deserialize)]
struct SpecDocument {
    #[serde(default)]
    config: LoaderConfig,
    mapping: Mapping,
}

impl LoaderSpec {
    /// Build a spec from an already constructed tree and validate it
    pub fn new(config: LoaderConfig, root: LoaderNode) -> Result<Self, SpecError> {
        config.validate()?;
        let spec = Self { config, root };
        spec.validate()?;
        Ok(spec)
    }

    /// Load a spec from a YAML file.
    ///
    /// # Example
    /// ```ignore
    /// use bibload::LoaderSpec;
    ///
    /// let spec = LoaderSpec::load_from_file("config/loader.yaml")?;
    /// println!("root table: {:?}", spec.root().table());
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SpecError> {
        let document: SpecDocument = serde_yaml::from_str(contents)?;
        document.config.validate()?;
        let root = ExprParser::new(&document.config)?.parse_node(ROOT_NODE, ROOT_NODE, &document.mapping)?;
        Self::new(document.config, root)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn root(&self) -> &LoaderNode {
        &self.root
    }

    /// Tables written by this spec, in traversal order, without duplicates
    pub fn tables(&self) -> Vec<&str> {
        fn collect<'a>(node: &'a LoaderNode, out: &mut Vec<&'a str>) {
            if let Some(table) = node.table() {
                if !out.contains(&table) {
                    out.push(table);
                }
            }
            for child in node.children.values() {
                collect(child, out);
            }
        }
        let mut tables = Vec::new();
        collect(&self.root, &mut tables);
        tables
    }

    /// Structural checks:
    ///
    /// - every binding of a node targets the node's table
    /// - every foreign key reference names a table bound by an enclosing node
    /// - below a node that fans out over field `F`, tag references name `F`
    ///   only, since nothing else is reachable from a single `F` occurrence
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut ancestors = Vec::new();
        validate_node(&self.root, ROOT_NODE, true, None, &self.config, &mut ancestors)
    }

    /// Check every bound table and column against the physical schema
    pub fn validate_against(&self, schemas: &SchemaRegistry) -> Result<(), SpecError> {
        validate_schema(&self.root, ROOT_NODE, schemas)
    }
}

/// `scope` is the field code an enclosing node fans out over, if any
fn validate_node<'a>(
    node: &'a LoaderNode,
    path: &str,
    is_root: bool,
    scope: Option<&'a str>,
    config: &LoaderConfig,
    ancestors: &mut Vec<&'a str>,
) -> Result<(), SpecError> {
    if let (Some((column, found)), Some(expected)) = (node.conflicts.first(), node.table()) {
        return Err(SpecError::TableMismatch {
            node: path.to_string(),
            column: column.clone(),
            expected: expected.to_string(),
            found: found.clone(),
        });
    }

    for (column, expr) in &node.bindings {
        match expr {
            SourceExpr::ForeignKeyRef { table, .. } if !ancestors.contains(&table.as_str()) => {
                return Err(SpecError::DanglingForeignKey {
                    node: path.to_string(),
                    column: column.clone(),
                    table: table.clone(),
                });
            }
            SourceExpr::TagRef(tag) => {
                if let Some(field) = scope.filter(|field| *field != tag.field()) {
                    return Err(SpecError::TagOutOfScope {
                        node: path.to_string(),
                        column: column.clone(),
                        tag: tag.format(&config.field_delimiter),
                        field: field.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    let fields = node.referenced_fields();
    if scope.is_none() && !is_root && fields.len() > 1 {
        warn!(
            node = path,
            fields = ?fields,
            "node references more than one field code and will be loaded once per record, not once per occurrence"
        );
    }
    let child_scope = match scope {
        None if fields.len() == 1 => fields.into_iter().next(),
        other => other,
    };

    if let Some(table) = node.table() {
        ancestors.push(table);
    }
    for (key, child) in &node.children {
        let child_path = format!("{}/{}", path, key);
        validate_node(child, &child_path, false, child_scope, config, ancestors)?;
    }
    if node.table.is_some() {
        ancestors.pop();
    }
    Ok(())
}

fn validate_schema(node: &LoaderNode, path: &str, schemas: &SchemaRegistry) -> Result<(), SpecError> {
    if let Some(table) = node.table() {
        let schema = schemas.get(table).ok_or_else(|| SpecError::UnknownTable {
            node: path.to_string(),
            table: table.to_string(),
        })?;

        for (column, expr) in &node.bindings {
            if !schema.has_column(column) {
                return Err(SpecError::UnknownColumn {
                    node: path.to_string(),
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
            if column == schema.primary_key() {
                return Err(SpecError::InvalidKey {
                    node: path.to_string(),
                    key: column.clone(),
                    reason: "the primary key is generated by the store".to_string(),
                });
            }
            if let SourceExpr::ForeignKeyRef {
                table: target,
                column: referenced,
            } = expr
            {
                let target_schema = schemas.get(target).ok_or_else(|| SpecError::UnknownTable {
                    node: path.to_string(),
                    table: target.clone(),
                })?;
                if let Some(referenced) = referenced {
                    if referenced != target_schema.primary_key() {
                        return Err(SpecError::NotPrimaryKey {
                            node: path.to_string(),
                            column: column.clone(),
                            table: target.clone(),
                            referenced: referenced.clone(),
                            primary_key: target_schema.primary_key().to_string(),
                        });
                    }
                }
            }
        }
    }

    for (key, child) in &node.children {
        validate_schema(child, &format!("{}/{}", path, key), schemas)?;
    }
    Ok(())
}

/// Turns mapping documents into loader nodes
struct ExprParser<'c> {
    config: &'c LoaderConfig,
    tag_pattern: Regex,
    fk_pattern: Regex,
}

impl<'c> ExprParser<'c> {
    fn new(config: &'c LoaderConfig) -> Result<Self, SpecError> {
        let tag_pattern = Regex::new(&format!(
            r"^\d{{3}}(?:{}.)?$",
            regex::escape(&config.field_delimiter)
        ))
        .map_err(|e| SpecError::InvalidConfig(e.to_string()))?;
        let fk_pattern = Regex::new(&format!(
            r"^([A-Za-z_][A-Za-z0-9_]*){}([A-Za-z_][A-Za-z0-9_]*)$",
            regex::escape(&config.table_delimiter)
        ))
        .map_err(|e| SpecError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            tag_pattern,
            fk_pattern,
        })
    }

    fn parse_node(&self, name: &str, path: &str, mapping: &Mapping) -> Result<LoaderNode, SpecError> {
        let mut node = LoaderNode::new(name);

        for (key, value) in mapping {
            let key = key.as_str().ok_or_else(|| SpecError::InvalidKey {
                node: path.to_string(),
                key: format!("{:?}", key),
                reason: "keys must be strings".to_string(),
            })?;

            if let Some(child_key) = key.strip_prefix(self.config.child_prefix.as_str()) {
                if child_key.is_empty() {
                    return Err(SpecError::InvalidKey {
                        node: path.to_string(),
                        key: key.to_string(),
                        reason: "child loader has no name".to_string(),
                    });
                }
                let child_mapping = value.as_mapping().ok_or_else(|| SpecError::InvalidValue {
                    node: path.to_string(),
                    key: key.to_string(),
                    reason: "a child loader must be a mapping".to_string(),
                })?;
                let child_path = format!("{}/{}", path, child_key);
                let child = self.parse_node(child_key, &child_path, child_mapping)?;
                node.children.insert(child_key.to_string(), child);
                continue;
            }

            let (deferred, binding_key) = match key.strip_prefix(self.config.deferred_prefix.as_str()) {
                Some(rest) => (true, rest),
                None => (false, key),
            };
            let (table, column) = self.split_binding_key(path, key, binding_key)?;
            let expr = if deferred {
                SourceExpr::Deferred
            } else {
                self.parse_expr(path, key, value)?
            };

            match node.table.as_deref() {
                None => node.table = Some(table.to_string()),
                Some(existing) if existing != table => {
                    return Err(SpecError::TableMismatch {
                        node: path.to_string(),
                        column: key.to_string(),
                        expected: existing.to_string(),
                        found: table.to_string(),
                    });
                }
                Some(_) => {}
            }

            if node.bindings.insert(column.to_string(), expr).is_some() {
                return Err(SpecError::InvalidKey {
                    node: path.to_string(),
                    key: key.to_string(),
                    reason: format!("column '{}' is bound more than once", column),
                });
            }
        }

        debug!(node = path, table = ?node.table, bindings = node.bindings.len(), children = node.children.len(), "parsed loader node");
        Ok(node)
    }

    fn split_binding_key<'k>(&self, path: &str, key: &str, binding_key: &'k str) -> Result<(&'k str, &'k str), SpecError> {
        let parts: Vec<&str> = binding_key.split(self.config.table_delimiter.as_str()).collect();
        match parts.as_slice() {
            [table, column] if !table.is_empty() && !column.is_empty() => Ok((*table, *column)),
            _ => Err(SpecError::InvalidKey {
                node: path.to_string(),
                key: key.to_string(),
                reason: format!("expected 'table{}column'", self.config.table_delimiter),
            }),
        }
    }

    fn parse_expr(&self, path: &str, key: &str, value: &YamlValue) -> Result<SourceExpr, SpecError> {
        let invalid = |reason: &str| SpecError::InvalidValue {
            node: path.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match value {
            YamlValue::Null => Ok(SourceExpr::Deferred),
            YamlValue::String(s) => Ok(self.classify(s)),
            YamlValue::Mapping(explicit) if explicit.len() == 1 => {
                let Some((kind, inner)) = explicit.iter().next() else {
                    return Err(invalid("empty mapping"));
                };
                match kind.as_str() {
                    Some("literal") => literal(inner)
                        .map(SourceExpr::Literal)
                        .ok_or_else(|| invalid("a literal must be a scalar")),
                    Some("tag") => inner
                        .as_str()
                        .and_then(|raw| Tag::parse(raw, &self.config.field_delimiter))
                        .map(SourceExpr::TagRef)
                        .ok_or_else(|| invalid("malformed tag reference")),
                    Some("fk") => inner
                        .as_str()
                        .and_then(|raw| self.parse_fk(raw))
                        .ok_or_else(|| invalid("malformed foreign key reference")),
                    _ => Err(invalid("expected one of 'literal', 'tag' or 'fk'")),
                }
            }
            other => literal(other)
                .map(SourceExpr::Literal)
                .ok_or_else(|| invalid("unsupported value")),
        }
    }

    fn classify(&self, raw: &str) -> SourceExpr {
        if self.tag_pattern.is_match(raw) {
            if let Some(tag) = Tag::parse(raw, &self.config.field_delimiter) {
                return SourceExpr::TagRef(tag);
            }
        }
        if let Some(caps) = self.fk_pattern.captures(raw) {
            return SourceExpr::ForeignKeyRef {
                table: caps[1].to_string(),
                column: Some(caps[2].to_string()),
            };
        }
        SourceExpr::Literal(Value::Text(raw.to_string()))
    }

    fn parse_fk(&self, raw: &str) -> Option<SourceExpr> {
        let parts: Vec<&str> = raw.split(self.config.table_delimiter.as_str()).collect();
        match parts.as_slice() {
            [table] if !table.is_empty() => Some(SourceExpr::ForeignKeyRef {
                table: table.to_string(),
                column: None,
            }),
            [table, column] if !table.is_empty() && !column.is_empty() => Some(SourceExpr::ForeignKeyRef {
                table: table.to_string(),
                column: Some(column.to_string()),
            }),
            _ => None,
        }
    }
}

fn literal(value: &YamlValue) -> Option<Value> {
    match value {
        YamlValue::String(s) => Some(Value::Text(s.clone())),
        YamlValue::Bool(b) => Some(Value::Boolean(*b)),
        YamlValue::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Float)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
config:
  field_delimiter: "$"
mapping:
  record.control_number: "001"
  record.title: "245$a"
  record.source: { literal: "catalogue" }
  record.pages: 320
  ~record.cover_url: null
  +topics:
    topic.record_id: record.id
    topic.term: "650$a"
    +notes:
      note.topic_id: { fk: topic }
      note.text: "650$x"
"#;

    #[test]
    fn test_parse_tree() {
        let spec = LoaderSpec::from_yaml_str(SPEC).unwrap();
        let root = spec.root();

        assert_eq!(root.name(), ROOT_NODE);
        assert_eq!(root.table(), Some("record"));
        assert_eq!(
            root.bindings()["control_number"],
            SourceExpr::TagRef(Tag::new("001", None))
        );
        assert_eq!(
            root.bindings()["title"],
            SourceExpr::TagRef(Tag::new("245", Some('a')))
        );
        assert_eq!(
            root.bindings()["source"],
            SourceExpr::Literal(Value::Text("catalogue".to_string()))
        );
        assert_eq!(root.bindings()["pages"], SourceExpr::Literal(Value::Integer(320)));
        assert_eq!(root.bindings()["cover_url"], SourceExpr::Deferred);

        let topics = &root.children()["topics"];
        assert_eq!(topics.table(), Some("topic"));
        assert_eq!(
            topics.bindings()["record_id"],
            SourceExpr::ForeignKeyRef {
                table: "record".to_string(),
                column: Some("id".to_string())
            }
        );

        let notes = &topics.children()["notes"];
        assert_eq!(
            notes.bindings()["topic_id"],
            SourceExpr::ForeignKeyRef {
                table: "topic".to_string(),
                column: None
            }
        );
        assert_eq!(spec.tables(), vec!["record", "topic", "note"]);
    }

    #[test]
    fn test_bindings_keep_declared_order() {
        let spec = LoaderSpec::from_yaml_str(SPEC).unwrap();
        let columns: Vec<&str> = spec.root().bindings().keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["control_number", "title", "source", "pages", "cover_url"]);
    }

    #[test]
    fn test_fan_out_field() {
        let spec = LoaderSpec::from_yaml_str(SPEC).unwrap();
        let root = spec.root();
        assert_eq!(root.fan_out_field(), None);
        assert_eq!(root.children()["topics"].fan_out_field(), Some("650"));
    }

    #[test]
    fn test_table_mismatch() {
        let yaml = r#"
mapping:
  record.title: "245$a"
  topic.term: "650$a"
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SpecError::TableMismatch { ref expected, ref found, .. } if expected == "record" && found == "topic"));
    }

    #[test]
    fn test_dangling_foreign_key() {
        let yaml = r#"
mapping:
  record.control_number: "001"
  record.title: "245$a"
  +topics:
    topic.shelf_id: shelf.id
    topic.term: "650$a"
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SpecError::DanglingForeignKey { ref table, .. } if table == "shelf"));
    }

    #[test]
    fn test_sibling_is_not_an_ancestor() {
        let yaml = r#"
mapping:
  record.control_number: "001"
  record.title: "245$a"
  +authors:
    author.name: "100$a"
  +topics:
    topic.author_id: author.id
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SpecError::DanglingForeignKey { ref node, .. } if node == "mapping/topics"));
    }

    #[test]
    fn test_self_reference_needs_ancestor() {
        let yaml = r#"
mapping:
  +parts:
    part.parent_id: part.id
    part.title: "245$a"
"#;
        assert!(LoaderSpec::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_custom_delimiters() {
        let yaml = r#"
config:
  field_delimiter: "|"
  child_prefix: "child:"
  table_delimiter: "/"
  deferred_prefix: "later:"
mapping:
  record/control_number: "001"
  record/title: "245|a"
  later:record/summary: ""
  child:topics:
    topic/record_id: record/id
    topic/term: "650|a"
"#;
        let spec = LoaderSpec::from_yaml_str(yaml).unwrap();
        let root = spec.root();
        assert_eq!(root.bindings()["title"], SourceExpr::TagRef(Tag::new("245", Some('a'))));
        assert_eq!(root.bindings()["summary"], SourceExpr::Deferred);
        assert!(root.children().contains_key("topics"));
    }

    #[test]
    fn test_explicit_literal_bypasses_classification() {
        let yaml = r#"
mapping:
  record.title: { literal: "245$a" }
  record.code: { literal: "book.review" }
"#;
        let spec = LoaderSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(
            spec.root().bindings()["code"],
            SourceExpr::Literal(Value::Text("book.review".to_string()))
        );
        assert_eq!(spec.root().fan_out_field(), None);
    }

    #[test]
    fn test_invalid_keys_and_values() {
        assert!(LoaderSpec::from_yaml_str("mapping:\n  title: \"245$a\"\n").is_err());
        assert!(LoaderSpec::from_yaml_str("mapping:\n  record.title: [1, 2]\n").is_err());
        assert!(LoaderSpec::from_yaml_str("mapping:\n  record.title: { tag: \"245$ab\" }\n").is_err());
        assert!(LoaderSpec::from_yaml_str("mapping:\n  +topics: \"650$a\"\n").is_err());
        assert!(LoaderSpec::from_yaml_str("config:\n  child_prefix: \"\"\nmapping: {}\n").is_err());
        assert!(LoaderSpec::from_yaml_str("config: {}\n").is_err());
    }

    #[test]
    fn test_column_bound_twice() {
        let yaml = r#"
mapping:
  record.title: "245$a"
  ~record.title: null
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SpecError::InvalidKey { .. }));
    }

    #[test]
    fn test_validate_against_schema() {
        let spec = LoaderSpec::from_yaml_str(
            r#"
mapping:
  record.control_number: "001"
  record.title: "245$a"
  +topics:
    topic.record_id: record.id
    topic.term: "650$a"
"#,
        )
        .unwrap();

        let schemas = SchemaRegistry::from_yaml_str(
            r#"
tables:
  record:
    columns: { control_number: text, title: text }
  topic:
    columns: { record_id: integer, term: text }
    foreign_keys: { record_id: record }
"#,
        )
        .unwrap();
        spec.validate_against(&schemas).unwrap();

        let missing_column = SchemaRegistry::from_yaml_str(
            r#"
tables:
  record:
    columns: { control_number: text, title: text }
  topic:
    columns: { record_id: integer }
"#,
        )
        .unwrap();
        let err = spec.validate_against(&missing_column).unwrap_err();
        assert!(matches!(err, SpecError::UnknownColumn { ref column, .. } if column == "term"));

        let other_key = SchemaRegistry::from_yaml_str(
            r#"
tables:
  record:
    primary_key: record_key
    columns: { control_number: text, title: text }
  topic:
    columns: { record_id: integer, term: text }
"#,
        )
        .unwrap();
        let err = spec.validate_against(&other_key).unwrap_err();
        assert!(matches!(err, SpecError::NotPrimaryKey { .. }));
    }

    #[test]
    fn test_programmatic_spec_is_validated() {
        let root = LoaderNode::new(ROOT_NODE).with_child(
            "topics",
            LoaderNode::new("topics").with_binding(
                "topic",
                "record_id",
                SourceExpr::ForeignKeyRef {
                    table: "record".to_string(),
                    column: None,
                },
            ),
        );
        assert!(LoaderSpec::new(LoaderConfig::default(), root).is_err());
    }

    #[test]
    fn test_mixed_tables_in_programmatic_node() {
        let root = LoaderNode::new(ROOT_NODE)
            .with_binding("record", "title", SourceExpr::TagRef(Tag::new("245", Some('a'))))
            .with_binding("topic", "term", SourceExpr::TagRef(Tag::new("650", Some('a'))));
        assert_eq!(root.table(), Some("record"));
        assert!(!root.bindings().contains_key("term"));

        let err = LoaderSpec::new(LoaderConfig::default(), root).unwrap_err();
        assert!(matches!(
            err,
            SpecError::TableMismatch { ref column, ref expected, ref found, .. }
                if column == "term" && expected == "record" && found == "topic"
        ));
    }

    #[test]
    fn test_single_field_root_scopes_children() {
        let yaml = r#"
mapping:
  record.title: "245$a"
  +topics:
    topic.term: "650$a"
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(
            err,
            SpecError::TagOutOfScope { ref node, ref tag, ref field, .. }
                if node == "mapping/topics" && tag == "650$a" && field == "245"
        ));

        let yaml = r#"
mapping:
  record.title: "245$a"
  +responsibility:
    statement.text: "245$c"
"#;
        let spec = LoaderSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(spec.root().fan_out_field(), Some("245"));
    }

    #[test]
    fn test_scope_reaches_grandchildren() {
        let yaml = r#"
config:
  field_delimiter: "|"
mapping:
  record.control_number: "001"
  record.title: "245|a"
  +topics:
    topic.term: "650|a"
    +notes:
      note.text: "651|a"
"#;
        let err = LoaderSpec::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(
            err,
            SpecError::TagOutOfScope { ref node, ref tag, .. } if node == "mapping/topics/notes" && tag == "651|a"
        ));
    }
}
