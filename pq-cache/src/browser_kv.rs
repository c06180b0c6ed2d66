//! The browser-KV (IndexedDB-style) cache store.
//!
//! A real embedding targets an IndexedDB object store keyed by the hashed
//! cache key, with `pruneExpired` driven by a cursor walk. This crate has
//! no browser runtime to bind to, so [`BrowserKvStore`] models the same
//! contract over an ordered in-memory map: insertion order stands in for
//! cursor order, and `prune`/`prune_expired` walk it exactly as a cursor
//! would rather than reaching for a shortcut like sorting by a separate
//! index.

use indexmap::IndexMap;
use parking_lot::Mutex;
use pq_errors::PqResult;

use crate::entry::CacheEntry;
use crate::store::{CacheStore, PruneOptions};

#[derive(Default)]
pub struct BrowserKvStore {
    object_store: Mutex<IndexMap<String, CacheEntry>>,
}

impl BrowserKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn approx_size(entry: &CacheEntry) -> u64 {
    serde_json::to_vec(entry).map(|v| v.len() as u64).unwrap_or(0)
}

impl CacheStore for BrowserKvStore {
    fn get(&self, key: &str) -> PqResult<Option<CacheEntry>> {
        let mut store = self.object_store.lock();
        let Some(entry) = store.get(key) else { return Ok(None) };
        let now = now_ms();
        if !entry.is_fresh(now) {
            store.shift_remove(key);
            return Ok(None);
        }
        Ok(Some(entry.clone()))
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> PqResult<()> {
        // `shift_remove` + re-insert keeps cursor order equal to
        // most-recently-written, matching how a real IndexedDB `put`
        // would move the record in an insertion-ordered cursor.
        let mut store = self.object_store.lock();
        store.shift_remove(key);
        store.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> PqResult<()> {
        self.object_store.lock().shift_remove(key);
        Ok(())
    }

    fn clear(&self) -> PqResult<()> {
        self.object_store.lock().clear();
        Ok(())
    }

    fn prune(&self, opts: PruneOptions) -> PqResult<()> {
        let mut store = self.object_store.lock();
        // Cursor walk, oldest-inserted first: expire first, same as the
        // lazy path in `get`, then enforce quotas against the remainder.
        let expired_keys: Vec<String> = store
            .iter()
            .filter(|(_, e)| !e.is_fresh(opts.now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired_keys {
            store.shift_remove(&k);
        }

        if let Some(max_entries) = opts.max_entries {
            while store.len() > max_entries {
                store.shift_remove_index(0);
            }
        }
        if let Some(max_bytes) = opts.max_bytes {
            let mut total: u64 = store.values().map(approx_size).sum();
            while total > max_bytes {
                let Some((_, removed)) = store.shift_remove_index(0) else { break };
                total = total.saturating_sub(approx_size(&removed));
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CachedTable;

    fn entry(expires_at_ms: Option<i64>) -> CacheEntry {
        CacheEntry { value: CachedTable::inline(vec!["a".into()], vec![]), created_at_ms: 0, expires_at_ms }
    }

    #[test]
    fn cursor_order_evicts_oldest_first() {
        let store = BrowserKvStore::new();
        store.set("a", &entry(None)).unwrap();
        store.set("b", &entry(None)).unwrap();
        store.set("c", &entry(None)).unwrap();
        store.prune(PruneOptions { now_ms: i64::MAX, max_entries: Some(2), max_bytes: None }).unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert!(store.get("c").unwrap().is_some());
    }

    #[test]
    fn rewrite_moves_to_most_recent() {
        let store = BrowserKvStore::new();
        store.set("a", &entry(None)).unwrap();
        store.set("b", &entry(None)).unwrap();
        store.set("a", &entry(None)).unwrap();
        store.prune(PruneOptions { now_ms: i64::MAX, max_entries: Some(1), max_bytes: None }).unwrap();
        assert!(store.get("b").unwrap().is_none());
        assert!(store.get("a").unwrap().is_some());
    }
}
