//! Foreign key context for one top-level record.
//!
//! Holds, per table name, a stack of the primary keys of the rows along the
//! current recursion path. A child row may only see the top of a stack, i.e.
//! the key of its nearest enclosing row of that table.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::store::PrimaryKey;

/// Per-table stacks of materialized keys.
///
/// An entry may be `None` when the enclosing node produced no row; lookups
/// through it yield `None` as well.
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyContext {
    stacks: HashMap<String, Vec<Option<PrimaryKey>>>,
}

impl ForeignKeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: &str, key: Option<PrimaryKey>) {
        self.stacks.entry(table.to_string()).or_default().push(key);
    }

    /// Remove and return the top entry of `table`'s stack
    pub fn pop(&mut self, table: &str) -> Option<Option<PrimaryKey>> {
        let stack = self.stacks.get_mut(table)?;
        let top = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(table);
        }
        top
    }

    /// Key of the nearest enclosing row of `table`
    pub fn peek(&self, table: &str) -> Option<PrimaryKey> {
        self.stacks.get(table).and_then(|stack| stack.last().copied().flatten())
    }

    pub fn depth(&self, table: &str) -> usize {
        self.stacks.get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Push `key` for `table` until the returned frame is dropped.
    ///
    /// With no table nothing is pushed and the frame is a plain borrow.
    ///
    /// # Arguments
    /// * `table` - Table of the row just upserted, `None` for a node without one
    /// * `key` - The row's key, `None` when the occurrence produced no row
    ///
    /// # Example
    /// ```
    /// use bibload::ForeignKeyContext;
    ///
    /// let mut fk = ForeignKeyContext::new();
    /// {
    ///     let frame = fk.enter(Some("record"), Some(7));
    ///     assert_eq!(frame.peek("record"), Some(7));
    /// }
    /// assert!(fk.is_empty());
    /// ```
    pub fn enter(&mut self, table: Option<&str>, key: Option<PrimaryKey>) -> Frame<'_> {
        if let Some(table) = table {
            self.push(table, key);
        }
        Frame {
            context: self,
            table: table.map(str::to_string),
        }
    }
}

/// Scope of one loader-node occurrence; pops its key when dropped
#[derive(Debug)]
pub struct Frame<'c> {
    context: &'c mut ForeignKeyContext,
    table: Option<String>,
}

impl Deref for Frame<'_> {
    type Target = ForeignKeyContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl DerefMut for Frame<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if let Some(table) = &self.table {
            self.context.pop(table);
        }
    }
}
