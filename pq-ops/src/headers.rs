//! `promoteHeaders` / `demoteHeaders` (§4.D).

use pq_errors::PqResult;
use pq_table::{make_unique_column_names, Column, ColumnType, DataTable, ITable};
use pq_value::Value;

/// Uses the first data row as column names (uniqued), inferring each
/// column's declared type from the remaining rows.
pub fn promote_headers(table: &dyn ITable) -> PqResult<DataTable> {
    if table.row_count() == 0 {
        return Ok(DataTable::new(table.columns().to_vec(), Vec::new()));
    }
    let header_row = table.get_row(0);
    let names: Vec<String> = header_row.iter().map(|v| v.to_display_string()).collect();
    let names = make_unique_column_names(&names);

    let rows: Vec<Vec<Value>> = table.iter_rows().skip(1).collect();
    let types = infer_types(&rows, names.len());
    let columns: Vec<Column> = names.into_iter().zip(types).map(|(n, t)| Column::new(n, t)).collect();
    Ok(DataTable::new(columns, rows))
}

/// Inserts the current column names as a new first row, renaming the
/// columns themselves to `Column1`, `Column2`, ….
pub fn demote_headers(table: &dyn ITable) -> PqResult<DataTable> {
    let header_row: Vec<Value> = table.columns().iter().map(|c| Value::Text(c.name.clone())).collect();
    let columns: Vec<Column> =
        (1..=table.columns().len()).map(|i| Column::any(format!("Column{i}"))).collect();
    let mut rows = vec![header_row];
    rows.extend(table.iter_rows());
    Ok(DataTable::new(columns, rows))
}

fn infer_types(rows: &[Vec<Value>], width: usize) -> Vec<ColumnType> {
    (0..width)
        .map(|col| {
            let mut saw_value = false;
            let mut all_number = true;
            let mut all_bool = true;
            for row in rows {
                let Some(v) = row.get(col) else { continue };
                if v.is_null() {
                    continue;
                }
                saw_value = true;
                all_number &= matches!(v, Value::Number(_));
                all_bool &= matches!(v, Value::Bool(_));
            }
            if !saw_value {
                ColumnType::Any
            } else if all_number {
                ColumnType::Number
            } else if all_bool {
                ColumnType::Bool
            } else {
                ColumnType::Any
            }
        })
        .collect()
}
