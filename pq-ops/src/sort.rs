//! `sortRows` (§4.D): a stable multi-key sort, nulls ordered per key,
//! ties broken by original row index so the sort is reproducibly stable
//! regardless of the underlying sort algorithm's own stability.

use pq_errors::{PqError, PqResult};
use pq_table::{DataTable, ITable, NullsOrder, SortDirection, SortKey};
use pq_value::Value;
use std::cmp::Ordering;

use crate::columns::ColumnLookup;

pub fn sort_rows(table: &dyn ITable, keys: &[SortKey]) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut resolved = Vec::with_capacity(keys.len());
    for key in keys {
        let idx = lookup
            .index(&key.column)
            .ok_or_else(|| PqError::contract(format!("sortRows: unknown column '{}'", key.column)))?;
        resolved.push((idx, key.direction, key.nulls));
    }

    let mut indexed: Vec<(usize, Vec<Value>)> = table.iter_rows().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        for (idx, direction, nulls) in &resolved {
            let ord = compare_key(&a[*idx], &b[*idx], *nulls);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        ia.cmp(ib)
    });

    let rows = indexed.into_iter().map(|(_, row)| row).collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

fn compare_key(a: &Value, b: &Value, nulls: NullsOrder) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (false, true) => match nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (false, false) => a.partial_compare(b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column;

    #[test]
    fn stable_under_equal_keys() {
        let t = DataTable::new(
            vec![Column::any("a"), Column::any("tag")],
            vec![
                vec![Value::Number(1.0), Value::Text("first".into())],
                vec![Value::Number(1.0), Value::Text("second".into())],
            ],
        );
        let out = sort_rows(
            &t,
            &[SortKey { column: "a".into(), direction: SortDirection::Ascending, nulls: NullsOrder::Last }],
        )
        .unwrap();
        assert_eq!(out.get_cell(0, 1), Value::Text("first".into()));
        assert_eq!(out.get_cell(1, 1), Value::Text("second".into()));
    }

    #[test]
    fn nulls_first_policy() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Number(1.0)], vec![Value::Null]],
        );
        let out = sort_rows(
            &t,
            &[SortKey { column: "a".into(), direction: SortDirection::Ascending, nulls: NullsOrder::First }],
        )
        .unwrap();
        assert_eq!(out.get_cell(0, 0), Value::Null);
    }
}
