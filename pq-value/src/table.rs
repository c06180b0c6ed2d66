//! The nested-table cell value: a self-contained row grid carried inside a
//! [`Value::Table`] cell, as produced by `expandTableColumn`'s source
//! columns or `merge`'s `nested` join mode.
//!
//! This is intentionally *not* the rich `ITable` trait from `pq-table`
//! (which would create a dependency cycle: `pq-table`'s cells are
//! [`Value`]s, and a nested-table cell needs to hold rows of `Value`s). It
//! is the minimal row/column grid a cell can carry; `pq-table` converts to
//! and from it at the boundary (promoting a `TableValue` to a full
//! `DataTable` and back) wherever an operator needs the richer type.

use serde::{Deserialize, Serialize};

use crate::key::composite_key;
use crate::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct TableValue {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableValue {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// A deterministic key for the whole nested table, used when a nested
    /// table itself ends up inside a composite grouping/distinct key.
    pub fn key(&self) -> String {
        let header = self.columns.join("\u{1}");
        let body: Vec<String> = self.rows.iter().map(|r| composite_key(r)).collect();
        format!("{header}\u{2}{}", body.join("\u{2}"))
    }
}
