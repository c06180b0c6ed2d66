//! Compiles and evaluates a [`Predicate`] tree against a single row, used
//! by both the materialized `filterRows` and the streaming compiler in
//! `pq-stream`.

use pq_errors::{PqError, PqResult};
use pq_table::{CompareOp, Predicate};
use pq_value::Value;

use crate::columns::ColumnLookup;

pub fn eval_predicate(pred: &Predicate, row: &[Value], lookup: &ColumnLookup) -> PqResult<bool> {
    match pred {
        Predicate::Compare { column, op, value, case_sensitive } => {
            let idx = lookup.index_of(column)?;
            let cell = &row[idx];
            Ok(eval_compare(cell, *op, value.as_ref(), *case_sensitive))
        }
        Predicate::And(a, b) => Ok(eval_predicate(a, row, lookup)? && eval_predicate(b, row, lookup)?),
        Predicate::Or(a, b) => Ok(eval_predicate(a, row, lookup)? || eval_predicate(b, row, lookup)?),
        Predicate::Not(a) => Ok(!eval_predicate(a, row, lookup)?),
    }
}

fn eval_compare(cell: &Value, op: CompareOp, operand: Option<&Value>, case_sensitive: bool) -> bool {
    match op {
        CompareOp::IsNull => cell.is_null(),
        CompareOp::IsNotNull => !cell.is_null(),
        CompareOp::Eq => operand.is_some_and(|v| cell.value_eq(v)),
        CompareOp::NotEq => operand.is_some_and(|v| !cell.value_eq(v)),
        CompareOp::Lt => operand
            .and_then(|v| cell.partial_compare(v))
            .is_some_and(|o| o.is_lt()),
        CompareOp::Gt => operand
            .and_then(|v| cell.partial_compare(v))
            .is_some_and(|o| o.is_gt()),
        CompareOp::Lte => operand
            .and_then(|v| cell.partial_compare(v))
            .is_some_and(|o| o.is_le()),
        CompareOp::Gte => operand
            .and_then(|v| cell.partial_compare(v))
            .is_some_and(|o| o.is_ge()),
        CompareOp::Contains => operand.is_some_and(|v| cell.contains(v, case_sensitive)),
        CompareOp::StartsWith => operand.is_some_and(|v| cell.starts_with(v, case_sensitive)),
        CompareOp::EndsWith => operand.is_some_and(|v| cell.ends_with(v, case_sensitive)),
    }
}

impl ColumnLookup {
    fn index_of(&self, name: &str) -> PqResult<usize> {
        self.index(name).ok_or_else(|| PqError::contract(format!("unknown column '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::Column;

    #[test]
    fn and_short_circuits_correctly() {
        let lookup = ColumnLookup::new(&[Column::any("a")]);
        let row = vec![Value::Number(5.0)];
        let pred = Predicate::And(
            Box::new(Predicate::Compare {
                column: "a".into(),
                op: CompareOp::Gt,
                value: Some(Value::Number(1.0)),
                case_sensitive: true,
            }),
            Box::new(Predicate::Compare {
                column: "a".into(),
                op: CompareOp::Lt,
                value: Some(Value::Number(10.0)),
                case_sensitive: true,
            }),
        );
        assert!(eval_predicate(&pred, &row, &lookup).unwrap());
    }

    #[test]
    fn null_comparisons_are_false() {
        let lookup = ColumnLookup::new(&[Column::any("a")]);
        let row = vec![Value::Null];
        let pred = Predicate::Compare {
            column: "a".into(),
            op: CompareOp::Gt,
            value: Some(Value::Number(1.0)),
            case_sensitive: true,
        };
        assert!(!eval_predicate(&pred, &row, &lookup).unwrap());
    }
}
