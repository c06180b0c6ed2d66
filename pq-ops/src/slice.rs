//! `take`, `skip`, `removeRows` (§4.D): row-window operators.

use pq_errors::PqResult;
use pq_table::{DataTable, ITable};

pub fn take(table: &dyn ITable, n: usize) -> PqResult<DataTable> {
    let rows = table.iter_rows().take(n).collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn skip(table: &dyn ITable, n: usize) -> PqResult<DataTable> {
    let rows = table.iter_rows().skip(n).collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

pub fn remove_rows(table: &dyn ITable, offset: usize, count: usize) -> PqResult<DataTable> {
    let end = offset.saturating_add(count);
    let rows = table
        .iter_rows()
        .enumerate()
        .filter(|(i, _)| *i < offset || *i >= end)
        .map(|(_, row)| row)
        .collect();
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column;
    use pq_value::Value;

    fn sample(n: usize) -> DataTable {
        DataTable::new(
            vec![Column::any("a")],
            (0..n).map(|i| vec![Value::Number(i as f64)]).collect(),
        )
    }

    #[test]
    fn remove_rows_drops_the_window() {
        let out = remove_rows(&sample(5), 1, 2).unwrap();
        let values: Vec<f64> = out.rows().iter().map(|r| r[0].as_f64().unwrap()).collect();
        assert_eq!(values, vec![0.0, 3.0, 4.0]);
    }

    #[test]
    fn take_and_skip_are_bounded() {
        assert_eq!(take(&sample(3), 10).unwrap().row_count(), 3);
        assert_eq!(skip(&sample(3), 10).unwrap().row_count(), 0);
    }
}
