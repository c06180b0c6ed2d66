//! Column-shape operators that never touch cell values: `selectColumns`,
//! `removeColumns`, `renameColumn`, `reorderColumns`,
//! `transformColumnNames` (§4.D).

use pq_errors::{PqError, PqResult};
use pq_table::{make_unique_column_names, Column, DataTable, ITable, MissingColumnPolicy, NameTransform};
use pq_value::Value;

use crate::columns::ColumnLookup;

pub fn select_columns(table: &dyn ITable, names: &[String]) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let idx = lookup
            .index(name)
            .ok_or_else(|| PqError::contract(format!("selectColumns: unknown column '{name}'")))?;
        indices.push(idx);
    }
    project(table, &indices)
}

pub fn remove_columns(table: &dyn ITable, names: &[String]) -> PqResult<DataTable> {
    let drop: std::collections::HashSet<&str> = names.iter().map(|s| s.as_str()).collect();
    let indices: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !drop.contains(c.name.as_str()))
        .map(|(i, _)| i)
        .collect();
    project(table, &indices)
}

fn project(table: &dyn ITable, indices: &[usize]) -> PqResult<DataTable> {
    let columns: Vec<Column> = indices.iter().map(|&i| table.columns()[i].clone()).collect();
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn rename_column(table: &dyn ITable, from: &str, to: &str) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let idx = lookup
        .index(from)
        .ok_or_else(|| PqError::contract(format!("renameColumn: unknown column '{from}'")))?;
    if from != to && lookup.index(to).is_some() {
        return Err(PqError::contract(format!("renameColumn: '{to}' already exists")));
    }
    let mut columns = table.columns().to_vec();
    columns[idx].name = to.to_string();
    Ok(DataTable::new(columns, table.iter_rows().collect()))
}

pub fn reorder_columns(
    table: &dyn ITable,
    prefix: &[String],
    missing: MissingColumnPolicy,
) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut order: Vec<Option<usize>> = Vec::with_capacity(prefix.len());
    for name in prefix {
        match lookup.index(name) {
            Some(i) => order.push(Some(i)),
            None => match missing {
                MissingColumnPolicy::Error => {
                    return Err(PqError::contract(format!("reorderColumns: unknown column '{name}'")))
                }
                MissingColumnPolicy::Ignore => continue,
                MissingColumnPolicy::UseNull => order.push(None),
            },
        }
    }
    let placed: std::collections::HashSet<usize> = order.iter().filter_map(|o| *o).collect();
    let tail: Vec<usize> = (0..table.columns().len()).filter(|i| !placed.contains(i)).collect();

    let mut columns = Vec::with_capacity(order.len() + tail.len());
    for (slot_idx, entry) in order.iter().enumerate() {
        match entry {
            Some(i) => columns.push(table.columns()[*i].clone()),
            None => columns.push(Column::any(&prefix[slot_idx])),
        }
    }
    for &i in &tail {
        columns.push(table.columns()[i].clone());
    }

    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|row| {
            let mut out = Vec::with_capacity(columns.len());
            for entry in &order {
                out.push(match entry {
                    Some(i) => row[*i].clone(),
                    None => Value::Null,
                });
            }
            for &i in &tail {
                out.push(row[i].clone());
            }
            out
        })
        .collect();
    Ok(DataTable::new(columns, rows))
}

pub fn transform_column_names(table: &dyn ITable, transform: NameTransform) -> PqResult<DataTable> {
    let raw: Vec<String> = table
        .columns()
        .iter()
        .map(|c| match transform {
            NameTransform::Upper => c.name.to_uppercase(),
            NameTransform::Lower => c.name.to_lowercase(),
            NameTransform::Trim => c.name.trim().to_string(),
        })
        .collect();
    let unique = make_unique_column_names(&raw);
    let columns: Vec<Column> = table
        .columns()
        .iter()
        .zip(unique)
        .map(|(c, name)| Column::new(name, c.ty))
        .collect();
    Ok(DataTable::new(columns, table.iter_rows().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::ColumnType;

    fn sample() -> DataTable {
        DataTable::new(
            vec![Column::any("a"), Column::any("b"), Column::any("c")],
            vec![vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]],
        )
    }

    #[test]
    fn select_reorders_and_drops() {
        let t = select_columns(&sample(), &["c".into(), "a".into()]).unwrap();
        assert_eq!(t.column_names(), vec!["c", "a"]);
        assert_eq!(t.get_cell(0, 0), Value::Number(3.0));
    }

    #[test]
    fn remove_preserves_residual_order() {
        let t = remove_columns(&sample(), &["b".into()]).unwrap();
        assert_eq!(t.column_names(), vec!["a", "c"]);
    }

    #[test]
    fn rename_collision_errors() {
        let err = rename_column(&sample(), "a", "b").unwrap_err();
        assert!(matches!(err, PqError::Contract(_)));
    }

    #[test]
    fn reorder_use_null_fills_missing_prefix_column() {
        let t = reorder_columns(
            &sample(),
            &["z".into(), "a".into()],
            MissingColumnPolicy::UseNull,
        )
        .unwrap();
        assert_eq!(t.column_names(), vec!["z", "a", "b", "c"]);
        assert_eq!(t.get_cell(0, 0), Value::Null);
    }

    #[test]
    fn reorder_ignore_skips_missing() {
        let t = reorder_columns(&sample(), &["z".into(), "a".into()], MissingColumnPolicy::Ignore).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn transform_names_uppercases_and_dedupes() {
        let t = DataTable::new(
            vec![Column::new("a", ColumnType::Any), Column::new("A", ColumnType::Any)],
            vec![],
        );
        let t = transform_column_names(&t, NameTransform::Upper).unwrap();
        assert_eq!(t.column_names(), vec!["A", "A.1"]);
    }
}
