//! Recursive record loader.
//!
//! Walks the loader spec tree in lock-step with a record, depth first:
//!
//! 1. compute the fan-out of the loader node against the record node
//! 2. for every occurrence, materialize and upsert its row
//! 3. push the row's key for the node's table
//! 4. load every child node against the occurrence, in declared order
//! 5. pop the key again
//!
//! Records are loaded strictly one after another, each with a fresh
//! [`ForeignKeyContext`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::record::{Record, RecordNode};
use crate::runtime::context::ForeignKeyContext;
use crate::runtime::materialize::materialize;
use crate::runtime::progress::Progress;
use crate::runtime::spec::{LoaderNode, LoaderSpec};
use crate::store::{Backend, MergeOrInsert};

/// What the driver does when a record fails to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the batch at the first failing record
    #[default]
    Abort,
    /// Log the failure and continue with the next record
    Skip,
}

/// Transaction granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionScope {
    /// Every row commits on its own
    #[default]
    PerRow,
    /// All rows of a record commit or roll back together
    PerRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderOptions {
    #[serde(default)]
    pub on_error: ErrorPolicy,
    #[serde(default)]
    pub transaction_scope: TransactionScope,
}

/// Row counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Rows inserted with a new key
    pub rows_created: usize,
    /// Rows that matched an existing row and reused its key
    pub rows_reused: usize,
    /// Occurrences of a table-bound node whose bindings all resolved to nothing
    pub rows_skipped: usize,
}

impl LoadStats {
    pub fn merge(&mut self, other: LoadStats) {
        self.rows_created += other.rows_created;
        self.rows_reused += other.rows_reused;
        self.rows_skipped += other.rows_skipped;
    }
}

/// A record that failed under [`ErrorPolicy::Skip`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records_total: usize,
    pub records_loaded: usize,
    pub failures: Vec<RecordFailure>,
    pub stats: LoadStats,
}

/// Occurrences a loader node is applied to.
///
/// On a composite node with bindings referencing exactly one field code, every
/// occurrence of that field, in document order. Otherwise the node itself.
pub fn fan_out<'r>(node: RecordNode<'r>, loader: &LoaderNode) -> Vec<RecordNode<'r>> {
    match loader.fan_out_field() {
        Some(code) if node.is_composite() => node.occurrences_of(code),
        _ => vec![node],
    }
}

/// Drives a [`LoaderSpec`] over records into a [`MergeOrInsert`] store
#[derive(Debug)]
pub struct RecursiveLoader<'s, B: Backend> {
    spec: &'s LoaderSpec,
    store: MergeOrInsert<B>,
    options: LoaderOptions,
}

impl<'s, B: Backend> RecursiveLoader<'s, B> {
    /// Create a loader with default [`LoaderOptions`].
    ///
    /// # Arguments
    /// * `spec` - Validated loader spec, borrowed for the loader's lifetime
    /// * `store` - Merge-or-insert store the rows are written to
    ///
    /// # Example
    /// ```
    /// use bibload::store::ColumnType;
    /// use bibload::{Field, LoaderSpec, MemoryBackend, MergeOrInsert, Record, RecursiveLoader, SchemaRegistry, TableSchema};
    ///
    /// let spec = LoaderSpec::from_yaml_str("mapping:\n  record.title: \"245$a\"\n").unwrap();
    /// let schemas = SchemaRegistry::new().with_table(TableSchema::new("record").column("title", ColumnType::Text));
    /// let mut loader = RecursiveLoader::new(&spec, MergeOrInsert::new(MemoryBackend::new(), schemas));
    ///
    /// let record = Record::new().with_field(Field::data("245").subfield('a', "Waterways"));
    /// assert_eq!(loader.load_record(&record).unwrap().rows_created, 1);
    /// ```
    pub fn new(spec: &'s LoaderSpec, store: MergeOrInsert<B>) -> Self {
        Self {
            spec,
            store,
            options: LoaderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &MergeOrInsert<B> {
        &self.store
    }

    pub fn into_store(self) -> MergeOrInsert<B> {
        self.store
    }

    /// Load one top-level record with a fresh foreign key context
    pub fn load_record(&mut self, record: &Record) -> Result<LoadStats, LoadError> {
        let mut fk = ForeignKeyContext::new();
        let mut stats = LoadStats::default();
        let root = self.spec.root();
        self.load(RecordNode::Record(record), root, &mut fk, &mut stats)?;
        Ok(stats)
    }

    /// Apply `loader` and its children to `node`
    pub fn load(
        &mut self,
        node: RecordNode<'_>,
        loader: &'s LoaderNode,
        fk: &mut ForeignKeyContext,
        stats: &mut LoadStats,
    ) -> Result<(), LoadError> {
        for occurrence in fan_out(node, loader) {
            let key = match (loader.table(), materialize(occurrence, loader, fk)) {
                (Some(table), Some(row)) => {
                    let upserted = self.store.upsert(table, &row)?;
                    if upserted.created {
                        stats.rows_created += 1;
                    } else {
                        stats.rows_reused += 1;
                    }
                    Some(upserted.key)
                }
                (Some(table), None) => {
                    debug!(node = loader.name(), table, "no values resolved, skipping row");
                    stats.rows_skipped += 1;
                    None
                }
                (None, _) => None,
            };

            let mut frame = fk.enter(loader.table(), key);
            for child in loader.children().values() {
                self.load(occurrence, child, &mut frame, stats)?;
            }
        }
        Ok(())
    }

    /// Load every record in order, reporting progress after each one
    pub fn load_records(&mut self, records: &[Record]) -> Result<BatchReport, LoadError> {
        let total = records.len();
        let progress = Progress::start(total);
        let mut report = BatchReport {
            records_total: total,
            ..BatchReport::default()
        };
        info!(total, options = ?self.options, "loading records");

        for (index, record) in records.iter().enumerate() {
            match self.load_in_scope(record) {
                Ok(stats) => {
                    report.stats.merge(stats);
                    report.records_loaded += 1;
                }
                Err(err) => {
                    let err = LoadError::Record {
                        index,
                        source: Box::new(err),
                    };
                    match self.options.on_error {
                        ErrorPolicy::Abort => return Err(err),
                        ErrorPolicy::Skip => {
                            warn!(index, error = %err, "skipping record");
                            report.failures.push(RecordFailure {
                                index,
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }
            info!("{}", progress.tick(index + 1));
        }

        info!(
            loaded = report.records_loaded,
            failed = report.failures.len(),
            created = report.stats.rows_created,
            reused = report.stats.rows_reused,
            "batch finished"
        );
        Ok(report)
    }

    fn load_in_scope(&mut self, record: &Record) -> Result<LoadStats, LoadError> {
        match self.options.transaction_scope {
            TransactionScope::PerRow => self.load_record(record),
            TransactionScope::PerRecord => {
                self.store.begin()?;
                match self.load_record(record) {
                    Ok(stats) => {
                        self.store.commit()?;
                        Ok(stats)
                    }
                    Err(err) => {
                        if let Err(rollback) = self.store.rollback() {
                            warn!(error = %rollback, "rollback of failed record failed");
                        }
                        Err(err)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Field, Tag};
    use crate::runtime::spec::SourceExpr;

    fn record() -> Record {
        Record::new()
            .with_field(Field::control("001", "ocm1"))
            .with_field(Field::data("650").subfield('a', "Bridges"))
            .with_field(Field::data("651").subfield('a', "Danube"))
            .with_field(Field::data("650").subfield('a', "Rivers"))
    }

    fn tagged(table: &str, column: &str, tag: &str, code: char) -> LoaderNode {
        LoaderNode::new(table).with_binding(table, column, SourceExpr::TagRef(Tag::new(tag, Some(code))))
    }

    #[test]
    fn test_fan_out_single_tag() {
        let record = record();
        let loader = tagged("topic", "term", "650", 'a');
        let occurrences = fan_out(RecordNode::Record(&record), &loader);
        assert_eq!(occurrences.len(), 2);
        assert!(occurrences.iter().all(|node| !node.is_composite()));
    }

    #[test]
    fn test_fan_out_zero_occurrences() {
        let record = record();
        let loader = tagged("name", "value", "700", 'a');
        assert!(fan_out(RecordNode::Record(&record), &loader).is_empty());
    }

    #[test]
    fn test_fan_out_multi_tag_is_single_pass() {
        let record = record();
        let loader = tagged("subject", "topic", "650", 'a').with_binding(
            "subject",
            "place",
            SourceExpr::TagRef(Tag::new("651", Some('a'))),
        );
        let occurrences = fan_out(RecordNode::Record(&record), &loader);
        assert_eq!(occurrences, vec![RecordNode::Record(&record)]);
    }

    #[test]
    fn test_fan_out_on_field_node_is_single_pass() {
        let record = record();
        let field = RecordNode::Record(&record).occurrences_of("650")[0];
        let loader = tagged("topic", "term", "650", 'a');
        assert_eq!(fan_out(field, &loader), vec![field]);
    }

    #[test]
    fn test_fan_out_without_tags_is_single_pass() {
        let record = record();
        let loader = LoaderNode::new("group");
        assert_eq!(fan_out(RecordNode::Record(&record), &loader).len(), 1);
    }

    #[test]
    fn test_stats_merge() {
        let mut total = LoadStats::default();
        total.merge(LoadStats {
            rows_created: 2,
            rows_reused: 1,
            rows_skipped: 0,
        });
        total.merge(LoadStats {
            rows_created: 1,
            rows_reused: 0,
            rows_skipped: 3,
        });
        assert_eq!(
            total,
            LoadStats {
                rows_created: 3,
                rows_reused: 1,
                rows_skipped: 3
            }
        );
    }

    #[test]
    fn test_options_from_yaml() {
        let options: LoaderOptions = serde_yaml::from_str("on_error: skip\ntransaction_scope: per_record\n").unwrap();
        assert_eq!(options.on_error, ErrorPolicy::Skip);
        assert_eq!(options.transaction_scope, TransactionScope::PerRecord);
        assert_eq!(LoaderOptions::default().on_error, ErrorPolicy::Abort);
    }
}
