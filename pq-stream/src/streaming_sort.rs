//! Streaming `sortRows` (§4.H): decorate every row with a monotonically
//! increasing sequence number, external-sort by `(user keys, seq)`, then
//! strip the decoration back off. The sequence guarantees stability
//! without depending on any particular sort algorithm's own stability.

use std::cmp::Ordering;
use std::sync::Arc;

use pq_errors::{AbortSignal, PqError, PqResult};
use pq_spill::{Batch, SpillStore};
use pq_table::{Column, NullsOrder, SortDirection, SortKey};
use pq_value::Value;

use crate::external_sort::{external_sort_batches, BatchSource, ExternalSortLimits, Row};

struct DecoratingSource<'a> {
    inner: &'a mut dyn BatchSource,
    next_seq: u64,
}

#[async_trait::async_trait]
impl<'a> BatchSource for DecoratingSource<'a> {
    async fn next_batch(&mut self) -> PqResult<Option<Batch>> {
        match self.inner.next_batch().await? {
            Some(batch) => {
                let decorated = batch
                    .into_iter()
                    .map(|mut row| {
                        row.push(Value::Number(self.next_seq as f64));
                        self.next_seq += 1;
                        row
                    })
                    .collect();
                Ok(Some(decorated))
            }
            None => Ok(None),
        }
    }
}

pub async fn streaming_sort(
    source: &mut dyn BatchSource,
    columns: &[Column],
    keys: &[SortKey],
    store: &dyn SpillStore,
    run_prefix: &str,
    limits: ExternalSortLimits,
    abort: &AbortSignal,
) -> PqResult<Vec<Batch>> {
    let mut resolved = Vec::with_capacity(keys.len());
    for key in keys {
        let idx = columns
            .iter()
            .position(|c| c.name == key.column)
            .ok_or_else(|| PqError::contract(format!("sortRows: unknown column '{}'", key.column)))?;
        resolved.push((idx, key.direction, key.nulls));
    }
    let seq_idx = columns.len();

    let comparator: Arc<dyn Fn(&Row, &Row) -> Ordering + Send + Sync> = Arc::new(move |a: &Row, b: &Row| {
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
        a[seq_idx].as_f64().partial_cmp(&b[seq_idx].as_f64()).unwrap_or(Ordering::Equal)
    });

    let mut decorating = DecoratingSource { inner: source, next_seq: 0 };
    let sorted = external_sort_batches(&mut decorating, comparator, store, run_prefix, limits, abort).await?;

    Ok(sorted
        .into_iter()
        .map(|batch| batch.into_iter().map(|mut row| { row.pop(); row }).collect())
        .collect())
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
    use crate::external_sort::VecBatchSource;
    use pq_spill::MemorySpillStore;
    use pq_table::Column as C;

    #[tokio::test]
    async fn stable_across_spilled_runs() {
        let store = MemorySpillStore::new();
        let columns = vec![C::any("a"), C::any("tag")];
        let rows: Vec<Batch> = (0..10)
            .map(|i| vec![vec![Value::Number(1.0), Value::Number(i as f64)]])
            .collect();
        let mut src = VecBatchSource::new(rows);
        let keys = vec![SortKey { column: "a".into(), direction: SortDirection::Ascending, nulls: NullsOrder::Last }];
        let limits = ExternalSortLimits { batch_size: 3, max_in_memory_rows: 3, max_in_memory_bytes: None };
        let out =
            streaming_sort(&mut src, &columns, &keys, &store, "t:stream-sort", limits, &AbortSignal::new())
                .await
                .unwrap();
        let tags: Vec<f64> = out.into_iter().flatten().map(|r| r[1].as_f64().unwrap()).collect();
        assert_eq!(tags, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }
}
