//! A small name-to-index helper shared by every operator that needs to
//! resolve column names against a row shape once, up front, rather than
//! re-scanning `columns()` per row.

use std::collections::HashMap;

use pq_table::Column;

#[derive(Clone)]
pub struct ColumnLookup {
    index: HashMap<String, usize>,
}

impl ColumnLookup {
    pub fn new(columns: &[Column]) -> Self {
        Self { index: columns.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect() }
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}
