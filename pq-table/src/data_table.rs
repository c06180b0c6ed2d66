//! The row-oriented table representation.

use std::collections::HashMap;
use std::sync::Arc;

use pq_value::Value;

use crate::column::Column;
use crate::itable::ITable;

/// `rows: Vec<Vec<Value>>` with an O(1) name-to-index map computed once at
/// construction, per the `getColumnIndex` invariant.
#[derive(Clone, Debug)]
pub struct DataTable {
    columns: Arc<[Column]>,
    index: Arc<HashMap<String, usize>>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            columns: columns.into(),
            index: Arc::new(index),
            rows,
        }
    }

    pub fn empty(columns: Vec<Column>) -> Self {
        Self::new(columns, Vec::new())
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

impl ITable for DataTable {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn get_column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn get_cell(&self, row: usize, col: usize) -> Value {
        self.rows[row][col].clone()
    }

    fn get_row(&self, row: usize) -> Vec<Value> {
        self.rows[row].clone()
    }

    fn head(&self, n: usize) -> Box<dyn ITable> {
        let n = n.min(self.rows.len());
        Box::new(DataTable {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows: self.rows[..n].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    #[test]
    fn column_index_is_present() {
        let t = DataTable::new(
            vec![Column::new("a", ColumnType::Number), Column::new("b", ColumnType::Text)],
            vec![vec![Value::Number(1.0), Value::Text("x".into())]],
        );
        assert_eq!(t.get_column_index("b"), Some(1));
        assert_eq!(t.get_column_index("z"), None);
    }

    #[test]
    fn head_truncates() {
        let t = DataTable::new(
            vec![Column::new("a", ColumnType::Number)],
            vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)]],
        );
        assert_eq!(t.head(1).row_count(), 1);
        assert_eq!(t.head(10).row_count(), 2);
    }
}
