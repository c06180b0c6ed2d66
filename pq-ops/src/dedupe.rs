//! `distinctRows`, `removeRowsWithErrors`, `replaceValues`,
//! `replaceErrorValues`, `fillDown` (§4.D). All key off [`Value::key`]
//! value-equality.

use std::collections::HashSet;

use pq_errors::{PqError, PqResult};
use pq_table::{DataTable, ITable};
use pq_value::Value;

use crate::columns::ColumnLookup;

pub fn distinct_rows(table: &dyn ITable, columns: Option<&[String]>) -> PqResult<DataTable> {
    let indices: Vec<usize> = match columns {
        Some(names) => {
            let lookup = ColumnLookup::new(table.columns());
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                out.push(
                    lookup
                        .index(name)
                        .ok_or_else(|| PqError::contract(format!("distinctRows: unknown column '{name}'")))?,
                );
            }
            out
        }
        None => (0..table.columns().len()).collect(),
    };

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for row in table.iter_rows() {
        let key: String = indices.iter().map(|&i| row[i].key()).collect::<Vec<_>>().join("\u{1}");
        if seen.insert(key) {
            rows.push(row);
        }
    }
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn remove_rows_with_errors(table: &dyn ITable, columns: Option<&[String]>) -> PqResult<DataTable> {
    let indices: Vec<usize> = match columns {
        Some(names) => {
            let lookup = ColumnLookup::new(table.columns());
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                out.push(
                    lookup
                        .index(name)
                        .ok_or_else(|| PqError::contract(format!("removeRowsWithErrors: unknown column '{name}'")))?,
                );
            }
            out
        }
        None => (0..table.columns().len()).collect(),
    };
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .filter(|row| !indices.iter().any(|&i| row[i].is_error()))
        .collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn replace_values(table: &dyn ITable, column: &str, find: &Value, replace: &Value) -> PqResult<DataTable> {
    let idx = table
        .get_column_index(column)
        .ok_or_else(|| PqError::contract(format!("replaceValues: unknown column '{column}'")))?;
    let find_key = find.key();
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|mut row| {
            if row[idx].key() == find_key {
                row[idx] = replace.clone();
            }
            row
        })
        .collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn replace_error_values(table: &dyn ITable, columns: &[String], replacement: &Value) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut indices = Vec::with_capacity(columns.len());
    for name in columns {
        indices.push(
            lookup
                .index(name)
                .ok_or_else(|| PqError::contract(format!("replaceErrorValues: unknown column '{name}'")))?,
        );
    }
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|mut row| {
            for &i in &indices {
                if row[i].is_error() {
                    row[i] = replacement.clone();
                }
            }
            row
        })
        .collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn fill_down(table: &dyn ITable, columns: &[String]) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut indices = Vec::with_capacity(columns.len());
    for name in columns {
        indices.push(
            lookup.index(name).ok_or_else(|| PqError::contract(format!("fillDown: unknown column '{name}'")))?,
        );
    }
    let mut last: Vec<Option<Value>> = vec![None; indices.len()];
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|mut row| {
            for (slot, &i) in indices.iter().enumerate() {
                if row[i].is_null() {
                    if let Some(prev) = &last[slot] {
                        row[i] = prev.clone();
                    }
                } else {
                    last[slot] = Some(row[i].clone());
                }
            }
            row
        })
        .collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column;

    #[test]
    fn distinct_keeps_first_occurrence() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Number(1.0)], vec![Value::Number(1.0)], vec![Value::Number(2.0)]],
        );
        let out = distinct_rows(&t, None).unwrap();
        assert_eq!(out.row_count(), 2);
    }

    #[test]
    fn distinct_is_idempotent() {
        let t = DataTable::new(vec![Column::any("a")], vec![vec![Value::Number(1.0)], vec![Value::Number(1.0)]]);
        let once = distinct_rows(&t, None).unwrap();
        let twice = distinct_rows(&once, None).unwrap();
        assert_eq!(once.rows(), twice.rows());
    }

    #[test]
    fn fill_down_carries_last_non_null() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Number(1.0)], vec![Value::Null], vec![Value::Null], vec![Value::Number(2.0)]],
        );
        let out = fill_down(&t, &["a".into()]).unwrap();
        assert_eq!(out.get_cell(1, 0), Value::Number(1.0));
        assert_eq!(out.get_cell(2, 0), Value::Number(1.0));
        assert_eq!(out.get_cell(3, 0), Value::Number(2.0));
    }

    #[test]
    fn remove_rows_with_errors_drops_only_flagged_rows() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Error("bad".into())], vec![Value::Number(1.0)]],
        );
        let out = remove_rows_with_errors(&t, None).unwrap();
        assert_eq!(out.row_count(), 1);
    }
}
