//! Tag-addressed catalogue records and the tag resolver.
//!
//! A [`Record`] is an ordered list of repeatable [`Field`]s. Each field carries a
//! short tag code (`"245"`, `"650"`, ...), an ordered set of single-character
//! subfields, and optionally a whole-field value (control fields such as `001`).
//!
//! Values are addressed with a [`Tag`]: `"650"` for the whole field or
//! `"650$a"` for one subfield, where the delimiter is configurable.

use indexmap::IndexMap;
use std::fmt;

/// One field occurrence inside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    tag: String,
    value: Option<String>,
    subfields: IndexMap<char, String>,
}

impl Field {
    /// Create a control field (`001`-`009` style) holding a single value
    pub fn control(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: Some(value.into()),
            subfields: IndexMap::new(),
        }
    }

    /// Create an empty data field; add subfields with [`Field::subfield`]
    pub fn data(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: None,
            subfields: IndexMap::new(),
        }
    }

    /// Builder-style variant of [`Field::add_subfield`]
    pub fn subfield(mut self, code: char, value: impl Into<String>) -> Self {
        self.add_subfield(code, value);
        self
    }

    /// Add a subfield. A repeated code keeps its first value.
    pub fn add_subfield(&mut self, code: char, value: impl Into<String>) {
        self.subfields.entry(code).or_insert_with(|| value.into());
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn get_subfield(&self, code: char) -> Option<&str> {
        self.subfields.get(&code).map(String::as_str)
    }

    pub fn subfields(&self) -> impl Iterator<Item = (char, &str)> {
        self.subfields.iter().map(|(code, value)| (*code, value.as_str()))
    }

    /// Whole-field value.
    ///
    /// Control fields return their data. Data fields return their subfield
    /// values joined by a single space, or `None` when they have none.
    pub fn value(&self) -> Option<String> {
        if let Some(value) = &self.value {
            return Some(value.clone());
        }
        if self.subfields.is_empty() {
            return None;
        }
        Some(
            self.subfields
                .values()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// A catalogue record: an ordered forest of fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All occurrences of a field code, in document order
    pub fn occurrences_of<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |field| field.tag == code)
    }

    /// First occurrence of a field code
    pub fn first(&self, code: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.tag == code)
    }
}

/// Address of a field or subfield value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    field: String,
    subfield: Option<char>,
}

impl Tag {
    pub fn new(field: impl Into<String>, subfield: Option<char>) -> Self {
        Self {
            field: field.into(),
            subfield,
        }
    }

    /// Parse `"FFF"` or `"FFF<delimiter>S"`.
    ///
    /// Anything that does not split into one or two non-empty parts, or whose
    /// subfield part is longer than one character, is rejected with `None`.
    ///
    /// ```
    /// use bibload::Tag;
    ///
    /// let tag = Tag::parse("650$a", "$").unwrap();
    /// assert_eq!(tag.field(), "650");
    /// assert_eq!(tag.subfield(), Some('a'));
    /// assert!(Tag::parse("650$a$b", "$").is_none());
    /// ```
    pub fn parse(raw: &str, delimiter: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || delimiter.is_empty() {
            return None;
        }

        let parts: Vec<&str> = raw.split(delimiter).collect();
        match parts.as_slice() {
            [field] if !field.is_empty() => Some(Self::new(*field, None)),
            [field, code] if !field.is_empty() => {
                let mut chars = code.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(Self::new(*field, Some(c))),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn subfield(&self) -> Option<char> {
        self.subfield
    }
}

impl Tag {
    /// Render with the given field delimiter, the inverse of [`Tag::parse`]
    pub fn format(&self, delimiter: &str) -> String {
        match self.subfield {
            Some(code) => format!("{}{}{}", self.field, delimiter, code),
            None => self.field.clone(),
        }
    }
}

/// Renders with the default `$` delimiter; use [`Tag::format`] for others
impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format("$"))
    }
}

/// Types that can resolve a [`Tag`] to a scalar value.
///
/// A missing field or subfield is a normal outcome and yields `None`.
pub trait TagResolver {
    fn resolve(&self, tag: &Tag) -> Option<String>;

    /// Parse `raw` with `delimiter` and resolve it; malformed tags yield `None`
    fn resolve_str(&self, raw: &str, delimiter: &str) -> Option<String> {
        Tag::parse(raw, delimiter).and_then(|tag| self.resolve(&tag))
    }
}

impl TagResolver for Field {
    /// Applies to this instance only; a tag for another field code is a miss.
    fn resolve(&self, tag: &Tag) -> Option<String> {
        if tag.field != self.tag {
            return None;
        }
        match tag.subfield {
            Some(code) => self.get_subfield(code).map(str::to_string),
            None => self.value(),
        }
    }
}

impl TagResolver for Record {
    /// Resolves against the first occurrence of the tag's field only.
    fn resolve(&self, tag: &Tag) -> Option<String> {
        self.first(&tag.field).and_then(|field| field.resolve(tag))
    }
}

/// A position in a record tree: the whole record or one selected field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordNode<'a> {
    Record(&'a Record),
    Field(&'a Field),
}

impl<'a> RecordNode<'a> {
    /// Whether addressable child fields exist below this node
    pub fn is_composite(&self) -> bool {
        matches!(self, RecordNode::Record(_))
    }

    /// Every occurrence of `code` below this node, in document order.
    /// A field node has no children and always yields an empty list.
    pub fn occurrences_of(&self, code: &str) -> Vec<RecordNode<'a>> {
        match self {
            RecordNode::Record(record) => record
                .fields
                .iter()
                .filter(|field| field.tag == code)
                .map(RecordNode::Field)
                .collect(),
            RecordNode::Field(_) => Vec::new(),
        }
    }
}

impl TagResolver for RecordNode<'_> {
    fn resolve(&self, tag: &Tag) -> Option<String> {
        match self {
            RecordNode::Record(record) => record.resolve(tag),
            RecordNode::Field(field) => field.resolve(tag),
        }
    }
}

/// Resolve `tag` against `node`
pub fn resolve_scalar(node: RecordNode<'_>, tag: &Tag) -> Option<String> {
    node.resolve(tag)
}

/// All occurrences of `code` in `record`, in document order
pub fn occurrences_of<'a>(record: &'a Record, code: &str) -> Vec<&'a Field> {
    record.fields.iter().filter(|field| field.tag == code).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new()
            .with_field(Field::control("001", "ocm0001"))
            .with_field(Field::data("245").subfield('a', "Bridges of the world").subfield('c', "Smith"))
            .with_field(Field::data("650").subfield('a', "Bridges"))
            .with_field(Field::data("650").subfield('a', "Rivers").subfield('x', "History"))
    }

    #[test]
    fn test_parse_field_only() {
        let tag = Tag::parse("001", "$").unwrap();
        assert_eq!(tag.field(), "001");
        assert_eq!(tag.subfield(), None);
    }

    #[test]
    fn test_parse_custom_delimiter() {
        let tag = Tag::parse("650__a", "__").unwrap();
        assert_eq!(tag, Tag::new("650", Some('a')));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(Tag::parse("", "$").is_none());
        assert!(Tag::parse("$a", "$").is_none());
        assert!(Tag::parse("650$", "$").is_none());
        assert!(Tag::parse("650$ab", "$").is_none());
        assert!(Tag::parse("650$a$b", "$").is_none());
    }

    #[test]
    fn test_record_resolves_first_occurrence() {
        let record = sample();
        assert_eq!(record.resolve_str("650$a", "$"), Some("Bridges".to_string()));
        assert_eq!(record.resolve_str("001", "$"), Some("ocm0001".to_string()));
    }

    #[test]
    fn test_missing_is_none() {
        let record = sample();
        assert_eq!(record.resolve_str("700$a", "$"), None);
        assert_eq!(record.resolve_str("650$z", "$"), None);
        assert_eq!(record.resolve_str("650$a$b", "$"), None);
    }

    #[test]
    fn test_field_node_applies_to_instance() {
        let record = sample();
        let second = RecordNode::Record(&record).occurrences_of("650")[1];
        assert_eq!(second.resolve_str("650$a", "$"), Some("Rivers".to_string()));
        assert_eq!(second.resolve_str("650$x", "$"), Some("History".to_string()));
    }

    #[test]
    fn test_field_node_misses_other_field_codes() {
        let record = sample();
        let second = RecordNode::Record(&record).occurrences_of("650")[1];
        assert_eq!(second.resolve_str("245$a", "$"), None);
        assert_eq!(second.resolve_str("001", "$"), None);
    }

    #[test]
    fn test_format_with_delimiter() {
        let tag = Tag::parse("650|a", "|").unwrap();
        assert_eq!(tag.format("|"), "650|a");
        assert_eq!(tag.to_string(), "650$a");
        assert_eq!(Tag::new("001", None).format("|"), "001");
    }

    #[test]
    fn test_whole_field_value_joins_subfields() {
        let record = sample();
        assert_eq!(
            record.resolve_str("245", "$"),
            Some("Bridges of the world Smith".to_string())
        );
        assert_eq!(Field::data("500").value(), None);
    }

    #[test]
    fn test_occurrences_in_document_order() {
        let record = sample();
        let found = occurrences_of(&record, "650");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get_subfield('a'), Some("Bridges"));
        assert_eq!(found[1].get_subfield('a'), Some("Rivers"));
        assert!(occurrences_of(&record, "651").is_empty());
    }

    #[test]
    fn test_field_node_is_not_composite() {
        let record = sample();
        let root = RecordNode::Record(&record);
        let field = root.occurrences_of("245")[0];
        assert!(root.is_composite());
        assert!(!field.is_composite());
        assert!(field.occurrences_of("245").is_empty());
    }

    #[test]
    fn test_repeated_subfield_code_keeps_first() {
        let field = Field::data("650").subfield('a', "First").subfield('a', "Second");
        assert_eq!(field.get_subfield('a'), Some("First"));
    }
}
