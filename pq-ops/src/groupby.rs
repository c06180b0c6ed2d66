//! `groupBy` (§4.D): for each distinct key-tuple (in first-seen order),
//! compute the requested aggregates.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use pq_errors::{PqError, PqResult};
use pq_table::{AggFn, AggSpec, Column, ColumnType, DataTable, ITable};
use pq_value::Value;

use crate::columns::ColumnLookup;

struct Accumulator {
    count: u64,
    numeric_count: u64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
    distinct: HashSet<String>,
}

impl Accumulator {
    fn new() -> Self {
        Self { count: 0, numeric_count: 0, sum: 0.0, min: None, max: None, distinct: HashSet::new() }
    }

    fn observe(&mut self, v: &Value) {
        self.count += 1;
        if let Some(n) = v.as_f64() {
            self.numeric_count += 1;
            self.sum += n;
        }
        if !v.is_null() {
            self.distinct.insert(v.key());
            self.min = Some(match self.min.take() {
                Some(cur) if cur.partial_compare(v).unwrap_or(Ordering::Equal) == Ordering::Less => cur,
                _ => v.clone(),
            });
            self.max = Some(match self.max.take() {
                Some(cur) if cur.partial_compare(v).unwrap_or(Ordering::Equal) == Ordering::Greater => cur,
                _ => v.clone(),
            });
        }
    }

    fn finalize(&self, agg: AggFn) -> Value {
        match agg {
            AggFn::Count => Value::Number(self.count as f64),
            AggFn::Sum => Value::Number(self.sum),
            AggFn::Average => {
                if self.numeric_count == 0 {
                    Value::Number(f64::NAN)
                } else {
                    Value::Number(self.sum / self.numeric_count as f64)
                }
            }
            AggFn::Min => self.min.clone().unwrap_or(Value::Null),
            AggFn::Max => self.max.clone().unwrap_or(Value::Null),
            AggFn::CountDistinct => Value::Number(self.distinct.len() as f64),
        }
    }
}

pub fn group_by(table: &dyn ITable, keys: &[String], aggs: &[AggSpec]) -> PqResult<DataTable> {
    let lookup = ColumnLookup::new(table.columns());
    let key_indices: Vec<usize> = keys
        .iter()
        .map(|k| lookup.index(k).ok_or_else(|| PqError::contract(format!("groupBy: unknown column '{k}'"))))
        .collect::<PqResult<_>>()?;
    let agg_indices: Vec<usize> = aggs
        .iter()
        .map(|a| {
            lookup
                .index(&a.source_column)
                .ok_or_else(|| PqError::contract(format!("groupBy: unknown column '{}'", a.source_column)))
        })
        .collect::<PqResult<_>>()?;

    let mut groups: IndexMap<String, (Vec<Value>, Vec<Accumulator>)> = IndexMap::new();
    for row in table.iter_rows() {
        let key_values: Vec<Value> = key_indices.iter().map(|&i| row[i].clone()).collect();
        let key = key_values.iter().map(|v| v.key()).collect::<Vec<_>>().join("\u{1}");
        let entry = groups
            .entry(key)
            .or_insert_with(|| (key_values, aggs.iter().map(|_| Accumulator::new()).collect()));
        for (slot, &col_idx) in agg_indices.iter().enumerate() {
            entry.1[slot].observe(&row[col_idx]);
        }
    }

    let mut columns: Vec<Column> = keys
        .iter()
        .zip(&key_indices)
        .map(|(name, &i)| Column::new(name.clone(), table.columns()[i].ty))
        .collect();
    for spec in aggs {
        columns.push(Column::new(spec.output_name.clone(), agg_output_type(spec.agg)));
    }

    let rows: Vec<Vec<Value>> = groups
        .into_values()
        .map(|(key_values, accs)| {
            let mut row = key_values;
            for (spec, acc) in aggs.iter().zip(&accs) {
                row.push(acc.finalize(spec.agg));
            }
            row
        })
        .collect();

    Ok(DataTable::new(columns, rows))
}

fn agg_output_type(agg: AggFn) -> ColumnType {
    match agg {
        AggFn::Min | AggFn::Max => ColumnType::Any,
        _ => ColumnType::Number,
    }
}
