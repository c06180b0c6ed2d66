//! `pivot` (§4.D): widens a key/value pair of columns into one output
//! column per distinct value of `row_column`, aggregating collisions with
//! `agg` (the same reducers as `groupBy`).

use indexmap::IndexMap;
use pq_errors::{PqError, PqResult};
use pq_table::{AggFn, Column, ColumnType, DataTable, ITable};
use pq_value::Value;

use crate::columns::ColumnLookup;

pub fn pivot(table: &dyn ITable, row_column: &str, value_column: &str, agg: AggFn) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let row_idx = lookup
        .index(row_column)
        .ok_or_else(|| PqError::contract(format!("pivot: unknown column '{row_column}'")))?;
    let value_idx = lookup
        .index(value_column)
        .ok_or_else(|| PqError::contract(format!("pivot: unknown column '{value_column}'")))?;

    let group_indices: Vec<usize> =
        (0..table.columns().len()).filter(|&i| i != row_idx && i != value_idx).collect();

    // column name (from row_column's distinct values), in first-seen order
    let mut pivot_names: IndexMap<String, String> = IndexMap::new();
    // group key -> (group row prefix, column name -> accumulated values)
    let mut groups: IndexMap<String, (Vec<Value>, IndexMap<String, Vec<f64>>)> = IndexMap::new();

    for row in table.iter_rows() {
        let pivot_name = row[row_idx].to_display_string();
        pivot_names.entry(pivot_name.clone()).or_insert_with(|| pivot_name.clone());

        let group_key: String = group_indices.iter().map(|&i| row[i].key()).collect::<Vec<_>>().join("\u{1}");
        let prefix: Vec<Value> = group_indices.iter().map(|&i| row[i].clone()).collect();
        let entry = groups.entry(group_key).or_insert_with(|| (prefix, IndexMap::new()));
        let bucket = entry.1.entry(pivot_name).or_default();
        if let Some(n) = row[value_idx].as_f64() {
            bucket.push(n);
        } else if matches!(agg, AggFn::Count | AggFn::CountDistinct) {
            bucket.push(f64::NAN);
        }
    }

    let mut columns: Vec<Column> =
        group_indices.iter().map(|&i| table.columns()[i].clone()).collect();
    for name in pivot_names.keys() {
        columns.push(Column::new(name.clone(), ColumnType::Number));
    }

    let rows: Vec<Vec<Value>> = groups
        .into_values()
        .map(|(prefix, buckets)| {
            let mut row = prefix;
            for name in pivot_names.keys() {
                let cell = match buckets.get(name) {
                    Some(values) => reduce(values, agg),
                    None => Value::Null,
                };
                row.push(cell);
            }
            row
        })
        .collect();

    Ok(DataTable::new(columns, rows))
}

fn reduce(values: &[f64], agg: AggFn) -> Value {
    match agg {
        AggFn::Count | AggFn::CountDistinct => Value::Number(values.len() as f64),
        AggFn::Sum => Value::Number(values.iter().sum()),
        AggFn::Average => Value::Number(values.iter().sum::<f64>() / values.len() as f64),
        AggFn::Min => Value::Number(values.iter().cloned().fold(f64::INFINITY, f64::min)),
        AggFn::Max => Value::Number(values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
    }
}

/// `unpivot` (§4.D): the inverse shape change. Emits one row per listed
/// column per original row, carrying that column's name into `name_column`
/// and its cell into `value_column`; all other columns are repeated
/// unchanged.
pub fn unpivot(
    table: &dyn ITable,
    columns: &[String],
    name_column: &str,
    value_column: &str,
) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let unpivot_idx: Vec<usize> = columns
        .iter()
        .map(|c| lookup.index(c).ok_or_else(|| PqError::contract(format!("unpivot: unknown column '{c}'"))))
        .collect::<PqResult<_>>()?;
    let keep_idx: Vec<usize> =
        (0..table.columns().len()).filter(|i| !unpivot_idx.contains(i)).collect();

    let mut out_columns: Vec<Column> = keep_idx.iter().map(|&i| table.columns()[i].clone()).collect();
    out_columns.push(Column::any(name_column));
    out_columns.push(Column::any(value_column));

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for row in table.iter_rows() {
        for &i in &unpivot_idx {
            let mut out: Vec<Value> = keep_idx.iter().map(|&k| row[k].clone()).collect();
            out.push(Value::Text(table.columns()[i].name.clone()));
            out.push(row[i].clone());
            rows.push(out);
        }
    }

    Ok(DataTable::new(out_columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column;

    #[test]
    fn unpivot_emits_one_row_per_listed_column() {
        let t = DataTable::new(
            vec![Column::any("id"), Column::any("q1"), Column::any("q2")],
            vec![vec![Value::Text("a".into()), Value::Number(1.0), Value::Number(2.0)]],
        );
        let out = unpivot(&t, &["q1".into(), "q2".into()], "quarter", "amount").unwrap();
        assert_eq!(out.column_names(), vec!["id", "quarter", "amount"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.get_cell(0, 1), Value::Text("q1".into()));
        assert_eq!(out.get_cell(1, 2), Value::Number(2.0));
    }

    #[test]
    fn unpivot_then_pivot_round_trips_without_aggregation() {
        let t = DataTable::new(
            vec![Column::any("id"), Column::any("q1"), Column::any("q2")],
            vec![vec![Value::Text("a".into()), Value::Number(1.0), Value::Number(2.0)]],
        );
        let long = unpivot(&t, &["q1".into(), "q2".into()], "quarter", "amount").unwrap();
        let wide = pivot(&long, "quarter", "amount", AggFn::Sum).unwrap();
        assert_eq!(wide.column_names(), vec!["id", "q1", "q2"]);
        assert_eq!(wide.get_cell(0, 1), Value::Number(1.0));
        assert_eq!(wide.get_cell(0, 2), Value::Number(2.0));
    }

    #[test]
    fn widens_distinct_row_values_into_columns() {
        let t = DataTable::new(
            vec![Column::any("product"), Column::any("quarter"), Column::any("amount")],
            vec![
                vec![Value::Text("widget".into()), Value::Text("Q1".into()), Value::Number(10.0)],
                vec![Value::Text("widget".into()), Value::Text("Q2".into()), Value::Number(20.0)],
                vec![Value::Text("gadget".into()), Value::Text("Q1".into()), Value::Number(5.0)],
            ],
        );
        let out = pivot(&t, "quarter", "amount", AggFn::Sum).unwrap();
        assert_eq!(out.column_names(), vec!["product", "Q1", "Q2"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.get_cell(0, 1), Value::Number(10.0));
        assert_eq!(out.get_cell(1, 2), Value::Null);
    }
}
