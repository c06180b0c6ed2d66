//! In-memory cache store: an [`lru::LruCache`] with an on-`get` TTL check
//! and `pop_lru` driving eviction during `prune`.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use pq_errors::PqResult;

use crate::entry::CacheEntry;
use crate::store::{CacheStore, PruneOptions};

pub struct MemoryStore {
    slots: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        // Capacity is unbounded by the LRU cache itself; quota enforcement
        // is a deliberate `prune()` call, not an eager per-insert cap.
        Self { slots: Mutex::new(LruCache::unbounded()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn approx_size(entry: &CacheEntry) -> u64 {
    serde_json::to_vec(entry).map(|v| v.len() as u64).unwrap_or(0)
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> PqResult<Option<CacheEntry>> {
        let mut slots = self.slots.lock();
        let now = now_ms();
        let is_fresh = slots.peek(key).map(|e| e.is_fresh(now));
        match is_fresh {
            Some(true) => Ok(slots.get(key).cloned()),
            Some(false) => {
                slots.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> PqResult<()> {
        self.slots.lock().put(key.to_string(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> PqResult<()> {
        self.slots.lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> PqResult<()> {
        self.slots.lock().clear();
        Ok(())
    }

    fn prune(&self, opts: PruneOptions) -> PqResult<()> {
        let mut slots = self.slots.lock();
        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, e)| !e.is_fresh(opts.now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            slots.pop(&k);
        }

        if let Some(max_entries) = opts.max_entries {
            while slots.len() > max_entries {
                if slots.pop_lru().is_none() {
                    break;
                }
            }
        }
        if let Some(max_bytes) = opts.max_bytes {
            let mut total: u64 = slots.iter().map(|(_, e)| approx_size(e)).sum();
            while total > max_bytes {
                match slots.pop_lru() {
                    Some((_, e)) => total = total.saturating_sub(approx_size(&e)),
                    None => break,
                }
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Bounded variant for hosts that want a hard entry-count cap enforced on
/// every insert rather than only at explicit `prune` calls.
pub fn bounded(capacity: NonZeroUsize) -> MemoryStore {
    MemoryStore { slots: Mutex::new(LruCache::new(capacity)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expires_at_ms: Option<i64>) -> CacheEntry {
        CacheEntry {
            value: crate::entry::CachedTable::inline(vec!["a".into()], vec![]),
            created_at_ms: 0,
            expires_at_ms,
        }
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let store = MemoryStore::new();
        store.set("k", &entry(Some(1))).unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn lru_evicts_oldest_first() {
        let store = MemoryStore::new();
        store.set("a", &entry(None)).unwrap();
        store.set("b", &entry(None)).unwrap();
        store.set("c", &entry(None)).unwrap();
        store.prune(PruneOptions { now_ms: i64::MAX, max_entries: Some(2), max_bytes: None }).unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert!(store.get("c").unwrap().is_some());
    }

    #[test]
    fn touching_a_key_protects_it_from_eviction() {
        let store = MemoryStore::new();
        store.set("a", &entry(None)).unwrap();
        store.set("b", &entry(None)).unwrap();
        store.get("a").unwrap();
        store.set("c", &entry(None)).unwrap();
        store.prune(PruneOptions { now_ms: i64::MAX, max_entries: Some(2), max_bytes: None }).unwrap();
        assert!(store.get("a").unwrap().is_some());
        assert!(store.get("b").unwrap().is_none());
    }
}
