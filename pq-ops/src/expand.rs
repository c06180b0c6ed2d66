//! `expandTableColumn` (§4.D): a column holding nested tables is expanded
//! into the cross product of the outer row with its nested rows. A
//! null or empty nested table still contributes a single output row with
//! nulls for the nested columns, so expansion never drops outer rows.

use pq_errors::{PqError, PqResult};
use pq_table::{Column, DataTable, ITable};
use pq_value::{TableValue, Value};

pub fn expand_table_column(table: &dyn ITable, column: &str) -> PqResult<DataTable> {
    let idx = table
        .get_column_index(column)
        .ok_or_else(|| PqError::contract(format!("expandTableColumn: unknown column '{column}'")))?;

    let nested_columns = nested_column_names(table, idx);
    let mut columns: Vec<Column> = Vec::with_capacity(table.columns().len() - 1 + nested_columns.len());
    for (i, c) in table.columns().iter().enumerate() {
        if i != idx {
            columns.push(c.clone());
        }
    }
    for name in &nested_columns {
        columns.push(Column::any(name.clone()));
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for row in table.iter_rows() {
        let outer: Vec<Value> =
            row.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, v)| v.clone()).collect();
        match &row[idx] {
            Value::Table(t) if !t.rows.is_empty() => {
                for nested_row in &t.rows {
                    let mut out = outer.clone();
                    out.extend(project_nested(&t.columns, nested_row, &nested_columns));
                    rows.push(out);
                }
            }
            _ => {
                // Null, empty nested table, or a non-table cell: one
                // output row, nested columns filled with null.
                let mut out = outer;
                out.extend(nested_columns.iter().map(|_| Value::Null));
                rows.push(out);
            }
        }
    }

    Ok(DataTable::new(columns, rows))
}

fn nested_column_names(table: &dyn ITable, idx: usize) -> Vec<String> {
    for row in table.iter_rows() {
        if let Value::Table(t) = &row[idx] {
            if !t.columns.is_empty() {
                return t.columns.clone();
            }
        }
    }
    Vec::new()
}

fn project_nested(nested_columns: &[String], nested_row: &[Value], wanted: &[String]) -> Vec<Value> {
    wanted
        .iter()
        .map(|name| {
            nested_columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| nested_row.get(i).cloned())
                .unwrap_or(Value::Null)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column as C;

    #[test]
    fn expands_cross_product_of_nested_rows() {
        let nested = TableValue::new(
            vec!["x".into(), "y".into()],
            vec![
                vec![Value::Number(1.0), Value::Number(2.0)],
                vec![Value::Number(3.0), Value::Number(4.0)],
            ],
        );
        let t = DataTable::new(
            vec![C::any("id"), C::any("nested")],
            vec![vec![Value::Text("a".into()), Value::Table(nested)]],
        );
        let out = expand_table_column(&t, "nested").unwrap();
        assert_eq!(out.column_names(), vec!["id", "x", "y"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.get_cell(1, 1), Value::Number(3.0));
    }

    #[test]
    fn null_nested_table_yields_one_row_of_nulls() {
        let t = DataTable::new(
            vec![C::any("id"), C::any("nested")],
            vec![vec![Value::Text("a".into()), Value::Null]],
        );
        let out = expand_table_column(&t, "nested").unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.column_names(), vec!["id"]);
    }

    #[test]
    fn empty_nested_table_yields_one_null_row_with_its_schema() {
        let nested = TableValue::empty(vec!["x".into()]);
        let t = DataTable::new(
            vec![C::any("id"), C::any("nested")],
            vec![vec![Value::Text("a".into()), Value::Table(nested)]],
        );
        let out = expand_table_column(&t, "nested").unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.column_names(), vec!["id", "x"]);
        assert_eq!(out.get_cell(0, 1), Value::Null);
    }
}
