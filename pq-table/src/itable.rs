//! The `ITable` contract satisfied by both concrete table representations.

use pq_value::Value;

use crate::column::Column;

/// The contract every table representation satisfies, so operators can be
/// written once against `&dyn ITable` regardless of whether the underlying
/// storage is a row-oriented grid or a columnar Arrow batch.
///
/// Invariants (§3.2): every row has exactly `columns().len()` cells;
/// `get_column_index` is O(1); `head(n)` never copies cell bytes unless the
/// underlying representation forces it (the Arrow adapter slices in O(1)).
pub trait ITable: Send + Sync {
    fn columns(&self) -> &[Column];

    fn row_count(&self) -> usize;

    fn get_column_index(&self, name: &str) -> Option<usize>;

    fn get_cell(&self, row: usize, col: usize) -> Value;

    fn get_row(&self, row: usize) -> Vec<Value> {
        (0..self.columns().len())
            .map(|c| self.get_cell(row, c))
            .collect()
    }

    fn iter_rows<'a>(&'a self) -> Box<dyn Iterator<Item = Vec<Value>> + 'a> {
        Box::new((0..self.row_count()).map(move |r| self.get_row(r)))
    }

    /// First `n` rows as a boxed table of the same underlying kind.
    fn head(&self, n: usize) -> Box<dyn ITable>;

    /// The full row grid, optionally with a leading header row of column
    /// names rendered as text.
    fn to_grid(&self, include_header: bool) -> Vec<Vec<Value>> {
        let mut grid = Vec::with_capacity(self.row_count() + include_header as usize);
        if include_header {
            grid.push(
                self.columns()
                    .iter()
                    .map(|c| Value::Text(c.name.clone()))
                    .collect(),
            );
        }
        grid.extend(self.iter_rows());
        grid
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name.clone()).collect()
    }
}
