//! The common cache store contract (§4.C). All four implementations
//! (memory, filesystem, encrypted filesystem, browser-KV) satisfy this.

use pq_errors::PqResult;

use crate::entry::CacheEntry;

/// Quotas for a proactive prune pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct PruneOptions {
    pub now_ms: i64,
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> PqResult<Option<CacheEntry>>;

    fn set(&self, key: &str, entry: &CacheEntry) -> PqResult<()>;

    fn delete(&self, key: &str) -> PqResult<()>;

    fn clear(&self) -> PqResult<()>;

    /// Lazily expire a single key; most stores also do this inline on
    /// `get`. Proactive, whole-store expiry.
    fn prune_expired(&self, now_ms: i64) -> PqResult<()> {
        self.prune(PruneOptions { now_ms, max_entries: None, max_bytes: None })
    }

    /// LRU + TTL combined prune pass.
    fn prune(&self, opts: PruneOptions) -> PqResult<()>;
}
