//! `filterRows` (§4.D): keep rows where the compiled predicate tree
//! evaluates to `true`.

use pq_errors::PqResult;
use pq_table::{DataTable, ITable, Predicate};

use crate::columns::ColumnLookup;
use crate::predicate::eval_predicate;

pub fn filter_rows(table: &dyn ITable, pred: &Predicate) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let mut rows = Vec::new();
    for row in table.iter_rows() {
        if eval_predicate(pred, &row, &lookup)? {
            rows.push(row);
        }
    }
    Ok(DataTable::new(table.columns().to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::{Column, CompareOp};
    use pq_value::Value;

    #[test]
    fn keeps_only_matching_rows() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Number(1.0)], vec![Value::Number(5.0)]],
        );
        let pred = Predicate::Compare {
            column: "a".into(),
            op: CompareOp::Gt,
            value: Some(Value::Number(2.0)),
            case_sensitive: true,
        };
        let out = filter_rows(&t, &pred).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.get_cell(0, 0), Value::Number(5.0));
    }

    #[test]
    fn filter_composes_like_and_of_predicates() {
        let t = DataTable::new(
            vec![Column::any("a")],
            vec![vec![Value::Number(1.0)], vec![Value::Number(5.0)], vec![Value::Number(9.0)]],
        );
        let gt2 = Predicate::Compare {
            column: "a".into(),
            op: CompareOp::Gt,
            value: Some(Value::Number(2.0)),
            case_sensitive: true,
        };
        let lt8 = Predicate::Compare {
            column: "a".into(),
            op: CompareOp::Lt,
            value: Some(Value::Number(8.0)),
            case_sensitive: true,
        };
        let chained = filter_rows(&filter_rows(&t, &gt2).unwrap(), &lt8).unwrap();
        let anded = filter_rows(&t, &Predicate::And(Box::new(gt2), Box::new(lt8))).unwrap();
        assert_eq!(chained.rows(), anded.rows());
    }
}
