//! Per-row value operators: `transformColumns`, `addColumn`,
//! `addIndexColumn`, `combineColumns`, `splitColumn` (§4.D).

use pq_errors::{PqError, PqResult};
use pq_table::{BoundFormula, Column, ColumnType, DataTable, ITable};
use pq_value::Value;

use crate::columns::ColumnLookup;

pub fn transform_columns(
    table: &dyn ITable,
    specs: &[(String, BoundFormula, Option<ColumnType>)],
) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut resolved = Vec::with_capacity(specs.len());
    for (name, formula, target_ty) in specs {
        let idx = lookup
            .index(name)
            .ok_or_else(|| PqError::contract(format!("transformColumns: unknown column '{name}'")))?;
        resolved.push((idx, formula, *target_ty));
    }
    let mut columns = table.columns().to_vec();
    for (idx, _, ty) in &resolved {
        if let Some(ty) = ty {
            columns[*idx].ty = *ty;
        }
    }
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|mut row| {
            for (idx, formula, _) in &resolved {
                row[*idx] = formula.call(&row);
            }
            row
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn add_column(table: &dyn ITable, name: &str, formula: &BoundFormula) -> PqResult<DataTable> {
    if table.get_column_index(name).is_some() {
        return Err(PqError::contract(format!("addColumn: '{name}' already exists")));
    }
    let mut columns = table.columns().to_vec();
    columns.push(Column::any(name));
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|mut row| {
            let value = formula.call(&row);
            row.push(value);
            row
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn add_index_column(
    table: &dyn ITable,
    name: &str,
    initial_value: f64,
    increment: f64,
) -> PqResult<DataTable> {
    let mut columns = table.columns().to_vec();
    columns.push(Column::new(name, ColumnType::Number));
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .enumerate()
        .map(|(i, mut row)| {
            row.push(Value::Number(initial_value + increment * i as f64));
            row
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn combine_columns(
    table: &dyn ITable,
    sources: &[String],
    delimiter: &str,
    new_name: &str,
) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut indices = Vec::with_capacity(sources.len());
    for name in sources {
        let idx = lookup
            .index(name)
            .ok_or_else(|| PqError::contract(format!("combineColumns: unknown column '{name}'")))?;
        indices.push(idx);
    }
    let insert_at = indices.iter().copied().min().unwrap_or(0);
    let drop: std::collections::HashSet<usize> = indices.iter().copied().collect();

    let mut columns: Vec<Column> = Vec::new();
    let mut insert_pos_in_output = 0usize;
    for (i, c) in table.columns().iter().enumerate() {
        if i == insert_at {
            insert_pos_in_output = columns.len();
            columns.push(Column::any(new_name));
        }
        if !drop.contains(&i) {
            columns.push(c.clone());
        }
    }
    if insert_at >= table.columns().len() {
        insert_pos_in_output = columns.len();
        columns.push(Column::any(new_name));
    }

    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|row| {
            let combined = indices
                .iter()
                .map(|&i| row[i].to_display_string())
                .collect::<Vec<_>>()
                .join(delimiter);
            let mut out: Vec<Value> = row
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !drop.contains(i))
                .map(|(_, v)| v)
                .collect();
            out.insert(insert_pos_in_output, Value::Text(combined));
            out
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn split_column(
    table: &dyn ITable,
    source: &str,
    delimiter: &str,
    target_names: Option<&[String]>,
) -> PqResult<DataTable> {
    let idx = table
        .get_column_index(source)
        .ok_or_else(|| PqError::contract(format!("splitColumn: unknown column '{source}'")))?;

    let all_rows = table.to_grid(false);
    let split_parts: Vec<Vec<String>> = all_rows
        .iter()
        .map(|row| match &row[idx] {
            Value::Null => vec![String::new()],
            v => v.to_display_string().split(delimiter).map(|s| s.to_string()).collect(),
        })
        .collect();

    let part_count = match target_names {
        Some(names) => names.len(),
        None => split_parts.iter().map(|p| p.len()).max().unwrap_or(1),
    };

    let names: Vec<String> = match target_names {
        Some(names) => names.to_vec(),
        None => (1..=part_count).map(|i| format!("{source}.{i}")).collect(),
    };

    let mut columns: Vec<Column> = Vec::new();
    for (i, c) in table.columns().iter().enumerate() {
        if i == idx {
            for name in &names {
                columns.push(Column::any(name));
            }
        } else {
            columns.push(c.clone());
        }
    }

    let rows: Vec<Vec<Value>> = all_rows
        .into_iter()
        .zip(split_parts)
        .map(|(row, parts)| {
            let mut out = Vec::with_capacity(columns.len());
            for (i, v) in row.into_iter().enumerate() {
                if i == idx {
                    for slot in 0..part_count {
                        out.push(parts.get(slot).map(|s| Value::Text(s.clone())).unwrap_or(Value::Null));
                    }
                } else {
                    out.push(v);
                }
            }
            out
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::DataTable as DT;

    fn sample() -> DT {
        DT::new(
            vec![Column::any("a"), Column::any("b")],
            vec![vec![Value::Text("x".into()), Value::Text("y".into())]],
        )
    }

    #[test]
    fn add_column_rejects_existing_name() {
        let f = BoundFormula::new("const", |_| Value::Number(1.0));
        assert!(add_column(&sample(), "a", &f).is_err());
    }

    #[test]
    fn add_index_column_applies_offset_and_increment() {
        let t = DT::new(vec![Column::any("a")], vec![vec![Value::Null], vec![Value::Null], vec![Value::Null]]);
        let out = add_index_column(&t, "idx", 10.0, 5.0).unwrap();
        assert_eq!(out.get_cell(0, 1), Value::Number(10.0));
        assert_eq!(out.get_cell(2, 1), Value::Number(20.0));
    }

    #[test]
    fn combine_columns_inserts_at_leftmost_position() {
        let out = combine_columns(&sample(), &["a".into(), "b".into()], "-", "combined").unwrap();
        assert_eq!(out.column_names(), vec!["combined"]);
        assert_eq!(out.get_cell(0, 0), Value::Text("x-y".into()));
    }

    #[test]
    fn split_column_without_explicit_names_computes_max_width() {
        let t = DT::new(
            vec![Column::any("a")],
            vec![vec![Value::Text("1,2,3".into())], vec![Value::Text("1,2".into())]],
        );
        let out = split_column(&t, "a", ",", None).unwrap();
        assert_eq!(out.column_names(), vec!["a.1", "a.2", "a.3"]);
        assert_eq!(out.get_cell(1, 2), Value::Null);
    }

    #[test]
    fn split_column_with_explicit_names() {
        let t = DT::new(vec![Column::any("a")], vec![vec![Value::Text("1|2".into())]]);
        let out = split_column(&t, "a", "|", Some(&["first".into(), "second".into()])).unwrap();
        assert_eq!(out.column_names(), vec!["first", "second"]);
    }
}
