//! `append` (§4.D): unions several already-resolved tables, aligning
//! columns by name. A column present in one table but not another becomes
//! null in the rows contributed by the tables that lack it.

use pq_table::{Column, DataTable, ITable};
use pq_value::Value;

pub fn append(tables: &[&dyn ITable]) -> DataTable {
    let mut columns: Vec<Column> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for table in tables {
        for c in table.columns() {
            if seen.insert(c.name.clone()) {
                columns.push(c.clone());
            }
        }
    }
    let index_by_name: std::collections::HashMap<&str, usize> =
        columns.iter().enumerate().map(|(i, c)| (c.name.as_str(), i)).collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for table in tables {
        let col_map: Vec<usize> = table.columns().iter().map(|c| index_by_name[c.name.as_str()]).collect();
        for row in table.iter_rows() {
            let mut out = vec![Value::Null; columns.len()];
            for (src, &dst) in col_map.iter().enumerate() {
                out[dst] = row[src].clone();
            }
            rows.push(out);
        }
    }

    DataTable::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column as C;

    #[test]
    fn unions_rows_and_aligns_columns_by_name() {
        let a = DataTable::new(
            vec![C::any("x"), C::any("y")],
            vec![vec![Value::Number(1.0), Value::Number(2.0)]],
        );
        let b = DataTable::new(vec![C::any("y"), C::any("z")], vec![vec![Value::Number(3.0), Value::Number(4.0)]]);
        let out = append(&[&a, &b]);
        assert_eq!(out.column_names(), vec!["x", "y", "z"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.get_cell(0, 2), Value::Null);
        assert_eq!(out.get_cell(1, 0), Value::Null);
        assert_eq!(out.get_cell(1, 1), Value::Number(3.0));
    }
}
