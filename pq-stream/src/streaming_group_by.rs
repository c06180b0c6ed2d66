//! Streaming `groupBy` (§4.H): a two-phase, sort-based implementation so
//! the whole operation stays bounded-memory via the same external sort
//! used for streaming `sortRows`.
//!
//! Phase 1 decorates every row with `(groupKey, rowIndex, keys…, agg
//! sources…)` and external-sorts by `(groupKey, rowIndex)`, so all rows of
//! a group arrive contiguously and `rowIndex` carries the group's
//! first-seen position. Phase 2 is a single pass over that sorted stream:
//! on every group boundary it finalizes the running accumulator and emits
//! a row prefixed with the group's `rowIndex`. A final external sort by
//! `rowIndex` restores first-seen group order, mirroring the materialized
//! `groupBy`'s `IndexMap` insertion order (§4.D).

use std::cmp::Ordering;
use std::sync::Arc;

use pq_errors::{AbortSignal, PqError, PqResult};
use pq_spill::{Batch, SpillStore};
use pq_table::{AggFn, AggSpec, Column, ColumnType};
use pq_value::{composite_key, Value};

use crate::external_sort::{external_sort_batches, BatchSource, ExternalSortLimits, Row, VecBatchSource};

struct DecoratingSource<'a> {
    inner: &'a mut dyn BatchSource,
    key_indices: Vec<usize>,
    agg_indices: Vec<usize>,
    next_row_index: u64,
}

#[async_trait::async_trait]
impl<'a> BatchSource for DecoratingSource<'a> {
    async fn next_batch(&mut self) -> PqResult<Option<Batch>> {
        match self.inner.next_batch().await? {
            Some(batch) => {
                let decorated = batch
                    .into_iter()
                    .map(|row| {
                        let key_values: Vec<Value> = self.key_indices.iter().map(|&i| row[i].clone()).collect();
                        let group_key = composite_key(&key_values);
                        let mut out = vec![Value::Text(group_key), Value::Number(self.next_row_index as f64)];
                        out.extend(key_values);
                        out.extend(self.agg_indices.iter().map(|&i| row[i].clone()));
                        self.next_row_index += 1;
                        out
                    })
                    .collect();
                Ok(Some(decorated))
            }
            None => Ok(None),
        }
    }
}

struct Accumulator {
    count: u64,
    numeric_count: u64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
    distinct: std::collections::HashSet<String>,
}

impl Accumulator {
    fn new() -> Self {
        Self { count: 0, numeric_count: 0, sum: 0.0, min: None, max: None, distinct: Default::default() }
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

fn agg_output_type(agg: AggFn) -> ColumnType {
    match agg {
        AggFn::Min | AggFn::Max => ColumnType::Any,
        _ => ColumnType::Number,
    }
}

pub async fn streaming_group_by(
    source: &mut dyn BatchSource,
    columns: &[Column],
    keys: &[String],
    aggs: &[AggSpec],
    store: &dyn SpillStore,
    run_prefix: &str,
    limits: ExternalSortLimits,
    abort: &AbortSignal,
) -> PqResult<(Vec<Column>, Vec<Batch>)> {
    let key_indices: Vec<usize> = keys
        .iter()
        .map(|k| {
            columns
                .iter()
                .position(|c| &c.name == k)
                .ok_or_else(|| PqError::contract(format!("groupBy: unknown column '{k}'")))
        })
        .collect::<PqResult<_>>()?;
    let agg_indices: Vec<usize> = aggs
        .iter()
        .map(|a| {
            columns
                .iter()
                .position(|c| c.name == a.source_column)
                .ok_or_else(|| PqError::contract(format!("groupBy: unknown column '{}'", a.source_column)))
        })
        .collect::<PqResult<_>>()?;

    let key_col_types: Vec<ColumnType> = key_indices.iter().map(|&i| columns[i].ty).collect();

    let comparator: Arc<dyn Fn(&Row, &Row) -> Ordering + Send + Sync> = Arc::new(|a: &Row, b: &Row| {
        a[0].to_display_string()
            .cmp(&b[0].to_display_string())
            .then_with(|| a[1].as_f64().partial_cmp(&b[1].as_f64()).unwrap_or(Ordering::Equal))
    });

    let mut decorating =
        DecoratingSource { inner: source, key_indices: key_indices.clone(), agg_indices, next_row_index: 0 };
    let phase1_prefix = format!("{run_prefix}:phase1");
    let sorted = external_sort_batches(&mut decorating, comparator, store, &phase1_prefix, limits, abort).await?;

    let keys_len = keys.len();
    let mut emitted: Vec<Row> = Vec::new();
    let mut current_key: Option<String> = None;
    let mut current_row_index = 0u64;
    let mut current_key_values: Vec<Value> = Vec::new();
    let mut accs: Vec<Accumulator> = Vec::new();

    let finalize_group = |row_index: u64, key_values: &[Value], accs: &[Accumulator]| -> Row {
        let mut row = vec![Value::Number(row_index as f64)];
        row.extend(key_values.iter().cloned());
        for (spec, acc) in aggs.iter().zip(accs) {
            row.push(acc.finalize(spec.agg));
        }
        row
    };

    for batch in sorted {
        for row in batch {
            abort.check()?;
            let group_key = row[0].to_display_string();
            let row_index = row[1].as_f64().unwrap() as u64;
            let key_values = row[2..2 + keys_len].to_vec();
            let agg_values = &row[2 + keys_len..];

            if current_key.as_deref() != Some(group_key.as_str()) {
                if current_key.is_some() {
                    emitted.push(finalize_group(current_row_index, &current_key_values, &accs));
                }
                current_key = Some(group_key);
                current_row_index = row_index;
                current_key_values = key_values;
                accs = aggs.iter().map(|_| Accumulator::new()).collect();
            }
            for (slot, v) in agg_values.iter().enumerate() {
                accs[slot].observe(v);
            }
        }
    }
    if current_key.is_some() {
        emitted.push(finalize_group(current_row_index, &current_key_values, &accs));
    }

    // Phase 2: restore first-seen group order via a second external sort
    // keyed on the rowIndex prefix, then strip it.
    let phase2_prefix = format!("{run_prefix}:phase2");
    let order_cmp: Arc<dyn Fn(&Row, &Row) -> Ordering + Send + Sync> =
        Arc::new(|a: &Row, b: &Row| a[0].as_f64().partial_cmp(&b[0].as_f64()).unwrap_or(Ordering::Equal));
    let mut emitted_source = VecBatchSource::new(vec![emitted]);
    let ordered =
        external_sort_batches(&mut emitted_source, order_cmp, store, &phase2_prefix, limits, abort).await?;

    let mut out_columns: Vec<Column> =
        keys.iter().zip(&key_col_types).map(|(name, ty)| Column::new(name.clone(), *ty)).collect();
    for spec in aggs {
        out_columns.push(Column::new(spec.output_name.clone(), agg_output_type(spec.agg)));
    }

    let final_batches: Vec<Batch> =
        ordered.into_iter().map(|batch| batch.into_iter().map(|row| row[1..].to_vec()).collect()).collect();

    Ok((out_columns, final_batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_sort::VecBatchSource;
    use pq_spill::MemorySpillStore;
    use pq_table::Column as C;

    #[tokio::test]
    async fn groups_spill_and_preserve_first_seen_order() {
        let store = MemorySpillStore::new();
        let columns = vec![C::any("region"), C::any("sales")];
        let regions = ["East", "West", "North", "South"];
        let rows: Vec<Batch> = (0..1000)
            .map(|i| {
                vec![vec![
                    Value::Text(regions[i % 4].to_string()),
                    Value::Number((i % 10000) as f64 * 0.5),
                ]]
            })
            .collect();
        let mut src = VecBatchSource::new(rows);
        let aggs = vec![AggSpec { source_column: "sales".into(), agg: AggFn::Sum, output_name: "total".into() }];
        let limits = ExternalSortLimits { batch_size: 64, max_in_memory_rows: 37, max_in_memory_bytes: None };
        let (out_columns, batches) = streaming_group_by(
            &mut src,
            &columns,
            &["region".to_string()],
            &aggs,
            &store,
            "t:gb",
            limits,
            &AbortSignal::new(),
        )
        .await
        .unwrap();
        assert_eq!(out_columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(), vec!["region", "total"]);
        let all_rows: Vec<Row> = batches.into_iter().flatten().collect();
        assert_eq!(all_rows.len(), 4);
        let seen_regions: Vec<String> = all_rows.iter().map(|r| r[0].to_display_string()).collect();
        assert_eq!(seen_regions, vec!["East", "West", "North", "South"]);
    }
}
