//! `merge` (§4.D): an equi-join against another query's already-resolved
//! table, on composite keys under `valueKey`. `pq-engine` resolves
//! `rightQuery` into a concrete table before calling this; this module
//! only ever sees the two materialized sides.

use pq_errors::{PqError, PqResult};
use pq_table::{make_unique_column_names, Column, DataTable, ITable, JoinMode, JoinType};
use pq_value::{composite_key, TableValue, Value};

use crate::columns::ColumnLookup;

pub fn merge(
    left: &dyn ITable,
    right: &dyn ITable,
    join_type: JoinType,
    left_keys: &[String],
    right_keys: &[String],
    mode: &JoinMode,
) -> PqResult<DataTable> {
    if left_keys.len() != right_keys.len() {
        return Err(PqError::contract(format!(
            "merge: left key count ({}) does not match right key count ({})",
            left_keys.len(),
            right_keys.len()
        )));
    }

    let left_lookup = ColumnLookup::new(left.columns());
    let right_lookup = ColumnLookup::new(right.columns());
    let left_idx = resolve(&left_lookup, left_keys, "merge: unknown left column")?;
    let right_idx = resolve(&right_lookup, right_keys, "merge: unknown right column")?;

    // Build side: bucket every right row by its composite key, preserving
    // insertion order within each bucket.
    let right_rows: Vec<Vec<Value>> = right.iter_rows().collect();
    let mut buckets: std::collections::HashMap<String, Vec<usize>> = std::collections::HashMap::new();
    for (i, row) in right_rows.iter().enumerate() {
        let key = composite_key(&right_idx.iter().map(|&c| row[c].clone()).collect::<Vec<_>>());
        buckets.entry(key).or_default().push(i);
    }

    match mode {
        JoinMode::Flat => merge_flat(left, &left_idx, &right_idx, right, &right_rows, &buckets, join_type),
        JoinMode::Nested { new_column_name } => merge_nested(
            left,
            &left_idx,
            &right_idx,
            right,
            &right_rows,
            &buckets,
            join_type,
            new_column_name,
        ),
    }
}

fn resolve(lookup: &ColumnLookup, names: &[String], msg: &str) -> PqResult<Vec<usize>> {
    names
        .iter()
        .map(|n| lookup.index(n).ok_or_else(|| PqError::contract(format!("{msg} '{n}'"))))
        .collect()
}

fn merge_flat(
    left: &dyn ITable,
    left_idx: &[usize],
    right_idx: &[usize],
    right: &dyn ITable,
    right_rows: &[Vec<Value>],
    buckets: &std::collections::HashMap<String, Vec<usize>>,
    join_type: JoinType,
) -> PqResult<DataTable> {
    // Right-side columns, excluding the right key columns (they're
    // redundant with the left keys once joined).
    let right_keep: Vec<usize> =
        (0..right.columns().len()).filter(|i| !right_idx.contains(i)).collect();

    let raw_names: Vec<String> = left
        .column_names()
        .into_iter()
        .chain(right_keep.iter().map(|&i| right.columns()[i].name.clone()))
        .collect();
    let unique_names = make_unique_column_names(&raw_names);
    let columns: Vec<Column> = unique_names
        .into_iter()
        .zip(left.columns().iter().chain(right_keep.iter().map(|&i| &right.columns()[i])).map(|c| c.ty))
        .map(|(name, ty)| Column::new(name, ty))
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for left_row in left.iter_rows() {
        let key = composite_key(&left_idx.iter().map(|&c| left_row[c].clone()).collect::<Vec<_>>());
        match buckets.get(&key) {
            Some(matches) => {
                for &ri in matches {
                    let mut out = left_row.clone();
                    out.extend(right_keep.iter().map(|&i| right_rows[ri][i].clone()));
                    rows.push(out);
                }
            }
            None => {
                if join_type == JoinType::Left {
                    let mut out = left_row.clone();
                    out.extend(right_keep.iter().map(|_| Value::Null));
                    rows.push(out);
                }
            }
        }
    }

    Ok(DataTable::new(columns, rows))
}

#[allow(clippy::too_many_arguments)]
fn merge_nested(
    left: &dyn ITable,
    left_idx: &[usize],
    _right_idx: &[usize],
    right: &dyn ITable,
    right_rows: &[Vec<Value>],
    buckets: &std::collections::HashMap<String, Vec<usize>>,
    join_type: JoinType,
    new_column_name: &str,
) -> PqResult<DataTable> {
    if left.get_column_index(new_column_name).is_some() {
        return Err(PqError::contract(format!("merge: '{new_column_name}' already exists")));
    }
    let right_names = right.column_names();
    let mut columns = left.columns().to_vec();
    columns.push(Column::any(new_column_name));

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for left_row in left.iter_rows() {
        let key = composite_key(&left_idx.iter().map(|&c| left_row[c].clone()).collect::<Vec<_>>());
        let nested_rows: Vec<Vec<Value>> = match buckets.get(&key) {
            Some(matches) => matches.iter().map(|&ri| right_rows[ri].clone()).collect(),
            None => Vec::new(),
        };
        if nested_rows.is_empty() && join_type != JoinType::Left {
            continue;
        }
        let mut out = left_row;
        out.push(Value::Table(TableValue::new(right_names.clone(), nested_rows)));
        rows.push(out);
    }

    Ok(DataTable::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::{Column as C, JoinType};

    fn left_table() -> DataTable {
        DataTable::new(
            vec![C::any("id"), C::any("name")],
            vec![
                vec![Value::Number(1.0), Value::Text("a".into())],
                vec![Value::Number(2.0), Value::Text("b".into())],
            ],
        )
    }

    fn right_table() -> DataTable {
        DataTable::new(
            vec![C::any("id"), C::any("score")],
            vec![
                vec![Value::Number(1.0), Value::Number(10.0)],
                vec![Value::Number(1.0), Value::Number(20.0)],
            ],
        )
    }

    #[test]
    fn inner_join_drops_unmatched_left_rows() {
        let out = merge(
            &left_table(),
            &right_table(),
            JoinType::Inner,
            &["id".into()],
            &["id".into()],
            &JoinMode::Flat,
        )
        .unwrap();
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.column_names(), vec!["id", "name", "score"]);
    }

    #[test]
    fn left_join_keeps_unmatched_rows_with_nulls() {
        let out = merge(
            &left_table(),
            &right_table(),
            JoinType::Left,
            &["id".into()],
            &["id".into()],
            &JoinMode::Flat,
        )
        .unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.get_cell(2, 2), Value::Null);
    }

    #[test]
    fn nested_mode_groups_matches_into_one_cell() {
        let out = merge(
            &left_table(),
            &right_table(),
            JoinType::Inner,
            &["id".into()],
            &["id".into()],
            &JoinMode::Nested { new_column_name: "matches".into() },
        )
        .unwrap();
        assert_eq!(out.row_count(), 1);
        match out.get_cell(0, 2) {
            Value::Table(t) => assert_eq!(t.rows.len(), 2),
            other => panic!("expected nested table, got {other:?}"),
        }
    }

    #[test]
    fn key_count_mismatch_is_a_contract_error() {
        let err = merge(
            &left_table(),
            &right_table(),
            JoinType::Inner,
            &["id".into()],
            &["id".into(), "score".into()],
            &JoinMode::Flat,
        )
        .unwrap_err();
        assert!(matches!(err, PqError::Contract(_)));
    }
}
