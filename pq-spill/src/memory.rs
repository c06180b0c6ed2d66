//! In-memory spill store: `Map<Key, Vec<Batch>>` behind a single lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use pq_errors::PqResult;

use crate::{approx_batch_bytes, Batch, SpillStats, SpillStore};

#[derive(Default)]
pub struct MemorySpillStore {
    keyed: Mutex<HashMap<String, Vec<Batch>>>,
    rows_written: AtomicU64,
    batches_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl MemorySpillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for MemorySpillStore {
    fn append(&self, key: &str, batch: Batch) -> PqResult<()> {
        self.rows_written.fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(approx_batch_bytes(&batch), Ordering::Relaxed);
        self.keyed.lock().entry(key.to_string()).or_default().push(batch);
        Ok(())
    }

    fn read_batches(&self, key: &str) -> PqResult<Vec<Batch>> {
        Ok(self.keyed.lock().get(key).cloned().unwrap_or_default())
    }

    fn clear(&self, key: &str) -> PqResult<()> {
        self.keyed.lock().remove(key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> PqResult<()> {
        self.keyed.lock().retain(|k, _| !k.starts_with(prefix));
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
    fn batches_preserve_insertion_order() {
        let store = MemorySpillStore::new();
        store.append("k", batch(1.0)).unwrap();
        store.append("k", batch(2.0)).unwrap();
        let batches = store.read_batches("k").unwrap();
        assert_eq!(batches, vec![batch(1.0), batch(2.0)]);
    }

    #[test]
    fn clear_prefix_is_idempotent_and_scoped() {
        let store = MemorySpillStore::new();
        store.append("sort:run:1", batch(1.0)).unwrap();
        store.append("sort:run:2", batch(2.0)).unwrap();
        store.append("groupby:run:1", batch(3.0)).unwrap();
        store.clear_prefix("sort:").unwrap();
        assert!(store.read_batches("sort:run:1").unwrap().is_empty());
        assert!(store.read_batches("sort:run:2").unwrap().is_empty());
        assert_eq!(store.read_batches("groupby:run:1").unwrap().len(), 1);
        // idempotent: clearing again is a no-op, not an error
        store.clear_prefix("sort:").unwrap();
    }

    #[test]
    fn stats_survive_clear() {
        let store = MemorySpillStore::new();
        store.append("k", batch(1.0)).unwrap();
        store.clear("k").unwrap();
        assert_eq!(store.stats().batches_written, 1);
        assert_eq!(store.stats().rows_written, 1);
    }
}
