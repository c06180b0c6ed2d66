//! External sort (§4.G): accumulates incoming rows until a memory
//! threshold is crossed, spills a sorted run, and finally performs a
//! k-way merge over the spilled runs via a min-heap. If nothing was ever
//! spilled, the whole input fit in memory and is sorted and returned
//! directly.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use pq_errors::{AbortSignal, PqResult};
use pq_spill::{Batch, SpillStore};
use pq_value::Value;

pub type Row = Vec<Value>;
pub type Comparator = Arc<dyn Fn(&Row, &Row) -> Ordering + Send + Sync>;

/// A pull-based source of batches, implemented by whatever is feeding
/// rows into the sort (a source adapter, a prior streaming stage, …).
#[async_trait::async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> PqResult<Option<Batch>>;
}

/// Wraps an already-materialized list of batches as a [`BatchSource`],
/// for tests and for callers that already have everything in memory.
pub struct VecBatchSource {
    batches: VecDeque<Batch>,
}

impl VecBatchSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches: batches.into() }
    }
}

#[async_trait::async_trait]
impl BatchSource for VecBatchSource {
    async fn next_batch(&mut self) -> PqResult<Option<Batch>> {
        Ok(self.batches.pop_front())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExternalSortLimits {
    pub batch_size: usize,
    pub max_in_memory_rows: usize,
    pub max_in_memory_bytes: Option<usize>,
}

impl Default for ExternalSortLimits {
    fn default() -> Self {
        Self { batch_size: 4096, max_in_memory_rows: 1 << 20, max_in_memory_bytes: None }
    }
}

/// Sorts `source`'s full row stream by `comparator`, spilling runs under
/// `run_prefix` when `limits.max_in_memory_rows`/`max_in_memory_bytes` is
/// crossed. Always clears its own run keys before returning, success or
/// failure.
pub async fn external_sort_batches(
    source: &mut dyn BatchSource,
    comparator: Comparator,
    store: &dyn SpillStore,
    run_prefix: &str,
    limits: ExternalSortLimits,
    abort: &AbortSignal,
) -> PqResult<Vec<Batch>> {
    let result = run(source, comparator, store, run_prefix, limits, abort).await;
    match result {
        Ok(batches) => {
            store.clear_prefix(run_prefix)?;
            Ok(batches)
        }
        Err(e) => {
            let _ = store.clear_prefix(run_prefix);
            Err(e)
        }
    }
}

async fn run(
    source: &mut dyn BatchSource,
    comparator: Comparator,
    store: &dyn SpillStore,
    run_prefix: &str,
    limits: ExternalSortLimits,
    abort: &AbortSignal,
) -> PqResult<Vec<Batch>> {
    let mut accumulator: Vec<Row> = Vec::new();
    let mut run_count = 0usize;

    loop {
        abort.check()?;
        match source.next_batch().await? {
            Some(batch) => {
                accumulator.extend(batch);
                let over_rows = accumulator.len() >= limits.max_in_memory_rows;
                let over_bytes = limits
                    .max_in_memory_bytes
                    .map(|max| approx_rows_bytes(&accumulator) >= max)
                    .unwrap_or(false);
                if over_rows || over_bytes {
                    abort.check()?;
                    accumulator.sort_by(|a, b| comparator(a, b));
                    let run_key = format!("{run_prefix}:run:{run_count}");
                    store.append(&run_key, std::mem::take(&mut accumulator))?;
                    run_count += 1;
                    tokio::task::yield_now().await;
                }
            }
            None => break,
        }
    }

    if run_count == 0 {
        accumulator.sort_by(|a, b| comparator(a, b));
        return Ok(chunk(accumulator, limits.batch_size));
    }

    if !accumulator.is_empty() {
        abort.check()?;
        accumulator.sort_by(|a, b| comparator(a, b));
        let run_key = format!("{run_prefix}:run:{run_count}");
        store.append(&run_key, std::mem::take(&mut accumulator))?;
        run_count += 1;
    }

    k_way_merge(store, run_prefix, run_count, comparator, limits.batch_size, abort).await
}

struct HeapEntry {
    row: Row,
    run_id: usize,
    cmp: Comparator,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.cmp)(&self.row, &other.row) == Ordering::Equal && self.run_id == other.run_id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&self.row, &other.row).then_with(|| self.run_id.cmp(&other.run_id))
    }
}

async fn k_way_merge(
    store: &dyn SpillStore,
    run_prefix: &str,
    run_count: usize,
    comparator: Comparator,
    batch_size: usize,
    abort: &AbortSignal,
) -> PqResult<Vec<Batch>> {
    let mut runs: Vec<VecDeque<Row>> = Vec::with_capacity(run_count);
    for run_id in 0..run_count {
        let run_key = format!("{run_prefix}:run:{run_id}");
        let rows: Vec<Row> = store.read_batches(&run_key)?.into_iter().flatten().collect();
        runs.push(rows.into());
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    for (run_id, run) in runs.iter_mut().enumerate() {
        if let Some(row) = run.pop_front() {
            heap.push(Reverse(HeapEntry { row, run_id, cmp: comparator.clone() }));
        }
    }

    let mut output: Vec<Row> = Vec::new();
    while let Some(Reverse(entry)) = heap.pop() {
        abort.check()?;
        output.push(entry.row);
        if let Some(next_row) = runs[entry.run_id].pop_front() {
            heap.push(Reverse(HeapEntry { row: next_row, run_id: entry.run_id, cmp: comparator.clone() }));
        }
        if output.len() >= batch_size * 4 {
            tokio::task::yield_now().await;
        }
    }

    Ok(chunk(output, batch_size))
}

fn chunk(rows: Vec<Row>, batch_size: usize) -> Vec<Batch> {
    if batch_size == 0 {
        return vec![rows];
    }
    rows.chunks(batch_size).map(|c| c.to_vec()).collect()
}

fn approx_rows_bytes(rows: &[Row]) -> usize {
    serde_json::to_vec(rows).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_spill::MemorySpillStore;

    fn row(n: f64) -> Row {
        vec![Value::Number(n)]
    }

    fn num_cmp() -> Comparator {
        Arc::new(|a: &Row, b: &Row| a[0].partial_compare(&b[0]).unwrap_or(Ordering::Equal))
    }

    #[tokio::test]
    async fn sorts_without_spilling_when_everything_fits() {
        let store = MemorySpillStore::new();
        let mut src = VecBatchSource::new(vec![vec![row(3.0), row(1.0)], vec![row(2.0)]]);
        let limits = ExternalSortLimits { batch_size: 10, max_in_memory_rows: 1000, max_in_memory_bytes: None };
        let out = external_sort_batches(&mut src, num_cmp(), &store, "t:sort", limits, &AbortSignal::new())
            .await
            .unwrap();
        let flat: Vec<f64> = out.into_iter().flatten().map(|r| r[0].as_f64().unwrap()).collect();
        assert_eq!(flat, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn merges_across_spilled_runs_and_clears_them() {
        let store = MemorySpillStore::new();
        let batches: Vec<Batch> = (0..20).rev().map(|n| vec![row(n as f64)]).collect();
        let mut src = VecBatchSource::new(batches);
        let limits = ExternalSortLimits { batch_size: 5, max_in_memory_rows: 4, max_in_memory_bytes: None };
        let out = external_sort_batches(&mut src, num_cmp(), &store, "t:sort2", limits, &AbortSignal::new())
            .await
            .unwrap();
        let flat: Vec<f64> = out.into_iter().flatten().map(|r| r[0].as_f64().unwrap()).collect();
        let expected: Vec<f64> = (0..20).map(|n| n as f64).collect();
        assert_eq!(flat, expected);
        // run keys are cleared on exit
        assert!(store.read_batches("t:sort2:run:0").unwrap().is_empty());
    }

    #[tokio::test]
    async fn aborts_cleanly() {
        let store = MemorySpillStore::new();
        let mut src = VecBatchSource::new(vec![vec![row(1.0)]]);
        let signal = AbortSignal::new();
        signal.abort();
        let limits = ExternalSortLimits::default();
        let err = external_sort_batches(&mut src, num_cmp(), &store, "t:abort", limits, &signal)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }
}
