//! Streaming `merge` (§4.H): build-side-indexed hash join with spill.
//!
//! Build phase consumes the right side fully, bucketing rows by composite
//! key in memory. Once the row count crosses `maxInMemoryRows` the whole
//! index is spilled to the store in one pass and every bucket written
//! from then on goes straight to the store. Probe phase streams the left
//! side and, per row, looks a bucket up either in memory or via the
//! store, assembling flat or nested output exactly like the materialized
//! `merge` (`pq_ops::merge`).

use std::collections::HashMap;

use pq_errors::{AbortSignal, PqError, PqResult};
use pq_spill::{Batch, SpillStore};
use pq_table::{make_unique_column_names, Column, JoinMode, JoinType};
use pq_value::{composite_key, TableValue, Value};

use crate::external_sort::{BatchSource, Row};

struct BuildIndex<'s> {
    store: &'s dyn SpillStore,
    prefix: String,
    memory: Option<HashMap<String, Vec<Row>>>,
    row_count: usize,
    max_in_memory_rows: usize,
}

impl<'s> BuildIndex<'s> {
    fn new(store: &'s dyn SpillStore, prefix: String, max_in_memory_rows: usize) -> Self {
        Self { store, prefix, memory: Some(HashMap::new()), row_count: 0, max_in_memory_rows }
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}:bucket:{key}", self.prefix)
    }

    fn insert(&mut self, key: &str, row: Row) -> PqResult<()> {
        self.row_count += 1;
        if let Some(memory) = &mut self.memory {
            memory.entry(key.to_string()).or_default().push(row);
            if self.row_count >= self.max_in_memory_rows {
                let spilling = self.memory.take().unwrap();
                for (k, rows) in spilling {
                    self.store.append(&self.bucket_key(&k), rows)?;
                }
                tracing::info!(operator = "merge", row_count = self.row_count, "stream:spill");
            }
            return Ok(());
        }
        self.store.append(&self.bucket_key(key), vec![row])
    }

    fn lookup(&self, key: &str) -> PqResult<Vec<Row>> {
        match &self.memory {
            Some(memory) => Ok(memory.get(key).cloned().unwrap_or_default()),
            None => Ok(self.store.read_batches(&self.bucket_key(key))?.into_iter().flatten().collect()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn streaming_merge(
    right_source: &mut dyn BatchSource,
    right_columns: &[Column],
    left_source: &mut dyn BatchSource,
    left_columns: &[Column],
    join_type: JoinType,
    left_keys: &[String],
    right_keys: &[String],
    mode: &JoinMode,
    store: &dyn SpillStore,
    run_prefix: &str,
    max_in_memory_rows: usize,
    abort: &AbortSignal,
) -> PqResult<(Vec<Column>, Vec<Batch>)> {
    if left_keys.len() != right_keys.len() {
        return Err(PqError::contract(format!(
            "merge: left key count ({}) does not match right key count ({})",
            left_keys.len(),
            right_keys.len()
        )));
    }
    let left_idx = resolve(left_columns, left_keys, "merge: unknown left column")?;
    let right_idx = resolve(right_columns, right_keys, "merge: unknown right column")?;

    let result = run(
        right_source,
        right_columns,
        &right_idx,
        left_source,
        left_columns,
        &left_idx,
        join_type,
        mode,
        store,
        run_prefix,
        max_in_memory_rows,
        abort,
    )
    .await;

    match result {
        Ok(out) => {
            store.clear_prefix(run_prefix)?;
            Ok(out)
        }
        Err(e) => {
            let _ = store.clear_prefix(run_prefix);
            Err(e)
        }
    }
}

fn resolve(columns: &[Column], names: &[String], msg: &str) -> PqResult<Vec<usize>> {
    names
        .iter()
        .map(|n| {
            columns.iter().position(|c| &c.name == n).ok_or_else(|| PqError::contract(format!("{msg} '{n}'")))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run(
    right_source: &mut dyn BatchSource,
    right_columns: &[Column],
    right_idx: &[usize],
    left_source: &mut dyn BatchSource,
    left_columns: &[Column],
    left_idx: &[usize],
    join_type: JoinType,
    mode: &JoinMode,
    store: &dyn SpillStore,
    run_prefix: &str,
    max_in_memory_rows: usize,
    abort: &AbortSignal,
) -> PqResult<(Vec<Column>, Vec<Batch>)> {
    let mut index = BuildIndex::new(store, run_prefix.to_string(), max_in_memory_rows);
    while let Some(batch) = right_source.next_batch().await? {
        abort.check()?;
        for row in batch {
            let key = composite_key(&right_idx.iter().map(|&i| row[i].clone()).collect::<Vec<_>>());
            index.insert(&key, row)?;
        }
    }
    tokio::task::yield_now().await;

    let right_keep: Vec<usize> = (0..right_columns.len()).filter(|i| !right_idx.contains(i)).collect();

    match mode {
        JoinMode::Flat => {
            let raw_names: Vec<String> = left_columns
                .iter()
                .map(|c| c.name.clone())
                .chain(right_keep.iter().map(|&i| right_columns[i].name.clone()))
                .collect();
            let unique_names = make_unique_column_names(&raw_names);
            let out_columns: Vec<Column> = unique_names
                .into_iter()
                .zip(left_columns.iter().chain(right_keep.iter().map(|&i| &right_columns[i])).map(|c| c.ty))
                .map(|(name, ty)| Column::new(name, ty))
                .collect();

            let mut out_batches: Vec<Batch> = Vec::new();
            while let Some(batch) = left_source.next_batch().await? {
                abort.check()?;
                let mut out_batch = Vec::with_capacity(batch.len());
                for left_row in batch {
                    let key = composite_key(&left_idx.iter().map(|&i| left_row[i].clone()).collect::<Vec<_>>());
                    let matches = index.lookup(&key)?;
                    if matches.is_empty() {
                        if join_type == JoinType::Left {
                            let mut out = left_row;
                            out.extend(right_keep.iter().map(|_| Value::Null));
                            out_batch.push(out);
                        }
                    } else {
                        for right_row in matches {
                            let mut out = left_row.clone();
                            out.extend(right_keep.iter().map(|&i| right_row[i].clone()));
                            out_batch.push(out);
                        }
                    }
                }
                out_batches.push(out_batch);
            }
            Ok((out_columns, out_batches))
        }
        JoinMode::Nested { new_column_name } => {
            if left_columns.iter().any(|c| &c.name == new_column_name) {
                return Err(PqError::contract(format!("merge: '{new_column_name}' already exists")));
            }
            let right_names: Vec<String> = right_columns.iter().map(|c| c.name.clone()).collect();
            let mut out_columns = left_columns.to_vec();
            out_columns.push(Column::any(new_column_name.clone()));

            let mut out_batches: Vec<Batch> = Vec::new();
            while let Some(batch) = left_source.next_batch().await? {
                abort.check()?;
                let mut out_batch = Vec::with_capacity(batch.len());
                for left_row in batch {
                    let key = composite_key(&left_idx.iter().map(|&i| left_row[i].clone()).collect::<Vec<_>>());
                    let matches = index.lookup(&key)?;
                    if matches.is_empty() && join_type != JoinType::Left {
                        continue;
                    }
                    let mut out = left_row;
                    out.push(Value::Table(TableValue::new(right_names.clone(), matches)));
                    out_batch.push(out);
                }
                out_batches.push(out_batch);
            }
            Ok((out_columns, out_batches))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_sort::VecBatchSource;
    use pq_spill::MemorySpillStore;
    use pq_table::Column as C;

    fn right_batches() -> Vec<Batch> {
        vec![vec![
            vec![Value::Number(1.0), Value::Number(10.0)],
            vec![Value::Number(1.0), Value::Number(20.0)],
            vec![Value::Number(2.0), Value::Number(30.0)],
        ]]
    }

    fn left_batches() -> Vec<Batch> {
        vec![
            vec![vec![Value::Number(1.0), Value::Text("a".into())]],
            vec![vec![Value::Number(3.0), Value::Text("b".into())]],
        ]
    }

    #[tokio::test]
    async fn flat_inner_join_matches_and_drops_unmatched() {
        let store = MemorySpillStore::new();
        let mut right = VecBatchSource::new(right_batches());
        let mut left = VecBatchSource::new(left_batches());
        let (columns, batches) = streaming_merge(
            &mut right,
            &[C::any("id"), C::any("score")],
            &mut left,
            &[C::any("id"), C::any("name")],
            JoinType::Inner,
            &["id".to_string()],
            &["id".to_string()],
            &JoinMode::Flat,
            &store,
            "t:merge",
            1000,
            &AbortSignal::new(),
        )
        .await
        .unwrap();
        assert_eq!(columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(), vec!["id", "name", "score"]);
        let rows: Vec<Row> = batches.into_iter().flatten().collect();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn flat_left_join_null_fills_unmatched_and_spills_build_side() {
        let store = MemorySpillStore::new();
        let mut right = VecBatchSource::new(right_batches());
        let mut left = VecBatchSource::new(left_batches());
        let (_, batches) = streaming_merge(
            &mut right,
            &[C::any("id"), C::any("score")],
            &mut left,
            &[C::any("id"), C::any("name")],
            JoinType::Left,
            &["id".to_string()],
            &["id".to_string()],
            &JoinMode::Flat,
            &store,
            "t:merge2",
            2, // forces an immediate spill of the build side
            &AbortSignal::new(),
        )
        .await
        .unwrap();
        let rows: Vec<Row> = batches.into_iter().flatten().collect();
        assert_eq!(rows.len(), 3); // 2 matches for id=1, 1 null-filled row for id=3
        assert!(rows.iter().any(|r| r[1] == Value::Text("b".into()) && r[2] == Value::Null));
    }

    #[tokio::test]
    async fn nested_mode_groups_matches_per_left_row() {
        let store = MemorySpillStore::new();
        let mut right = VecBatchSource::new(right_batches());
        let mut left = VecBatchSource::new(left_batches());
        let (columns, batches) = streaming_merge(
            &mut right,
            &[C::any("id"), C::any("score")],
            &mut left,
            &[C::any("id"), C::any("name")],
            JoinType::Inner,
            &["id".to_string()],
            &["id".to_string()],
            &JoinMode::Nested { new_column_name: "matches".into() },
            &store,
            "t:merge3",
            1000,
            &AbortSignal::new(),
        )
        .await
        .unwrap();
        assert_eq!(columns.last().unwrap().name, "matches");
        let rows: Vec<Row> = batches.into_iter().flatten().collect();
        assert_eq!(rows.len(), 1);
        match &rows[0][2] {
            Value::Table(t) => assert_eq!(t.rows.len(), 2),
            other => panic!("expected nested table, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn key_count_mismatch_is_a_contract_error() {
        let store = MemorySpillStore::new();
        let mut right = VecBatchSource::new(right_batches());
        let mut left = VecBatchSource::new(left_batches());
        let err = streaming_merge(
            &mut right,
            &[C::any("id"), C::any("score")],
            &mut left,
            &[C::any("id"), C::any("name")],
            JoinType::Inner,
            &["id".to_string()],
            &["id".to_string(), "score".to_string()],
            &JoinMode::Flat,
            &store,
            "t:merge4",
            1000,
            &AbortSignal::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PqError::Contract(_)));
    }
}
