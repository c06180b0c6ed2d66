//! Browser-KV (IndexedDB-style) spill store: `(autoIncrement id, key,
//! rows)` records, with cursor-based iteration and cursor-delete for
//! `clearPrefix` (§4.F).

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use pq_errors::PqResult;

use crate::{approx_batch_bytes, Batch, SpillStats, SpillStore};

struct Record {
    key: String,
    batch: Batch,
}

#[derive(Default)]
pub struct BrowserKvSpillStore {
    next_id: AtomicU64,
    // Keyed by the autoincrement id so insertion order is the cursor
    // order, same as a real IndexedDB object store keyed on an
    // auto-incrementing primary key.
    records: Mutex<IndexMap<u64, Record>>,
    rows_written: AtomicU64,
    batches_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl BrowserKvSpillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for BrowserKvSpillStore {
    fn append(&self, key: &str, batch: Batch) -> PqResult<()> {
        self.rows_written.fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(approx_batch_bytes(&batch), Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.lock().insert(id, Record { key: key.to_string(), batch });
        Ok(())
    }

    fn read_batches(&self, key: &str) -> PqResult<Vec<Batch>> {
        // A cursor walk in ascending primary-key order, filtered by the
        // `key` index value.
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.key == key)
            .map(|r| r.batch.clone())
            .collect())
    }

    fn clear(&self, key: &str) -> PqResult<()> {
        self.records.lock().retain(|_, r| r.key != key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> PqResult<()> {
        // Cursor-delete: walk and remove matching records rather than
        // rebuilding the whole store.
        self.records.lock().retain(|_, r| !r.key.starts_with(prefix));
        Ok(())
    }

    fn stats(&self) -> SpillStats {
        SpillStats {
            rows_written: self.rows_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_value::Value;

    fn batch(v: f64) -> Batch {
        vec![vec![Value::Number(v)]]
    }

    #[test]
    fn cursor_preserves_autoincrement_order_across_keys() {
        let store = BrowserKvSpillStore::new();
        store.append("a", batch(1.0)).unwrap();
        store.append("b", batch(2.0)).unwrap();
        store.append("a", batch(3.0)).unwrap();
        assert_eq!(store.read_batches("a").unwrap(), vec![batch(1.0), batch(3.0)]);
    }

    #[test]
    fn clear_prefix_removes_matching_records_only() {
        let store = BrowserKvSpillStore::new();
        store.append("sort:1", batch(1.0)).unwrap();
        store.append("join:1", batch(2.0)).unwrap();
        store.clear_prefix("sort:").unwrap();
        assert!(store.read_batches("sort:1").unwrap().is_empty());
        assert_eq!(store.read_batches("join:1").unwrap().len(), 1);
    }
}
