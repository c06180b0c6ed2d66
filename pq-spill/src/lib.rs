//! The spill store (§3.5, §4.F): an append-only multimap `Key -> list<Batch>`
//! used to push intermediate rows out of memory for the external sort,
//! streaming group-by, and streaming join in `pq-stream`.
//!
//! Every implementation here is synchronous. The suspension points §5
//! calls out ("every spill write / read") are a cooperative-yield
//! contract for the caller, not a requirement that this trait's methods
//! be `async fn`: `pq-stream` yields (`tokio::task::yield_now().await`)
//! around each call instead, the same way `pq-cache`'s `CacheStore` stays
//! synchronous and the engine yields around cache I/O.

pub mod browser_kv;
pub mod memory;

use pq_errors::PqResult;
use pq_value::Value;

/// A contiguous chunk of rows handled as one spill unit.
pub type Batch = Vec<Vec<Value>>;

/// Running totals a spill store accumulates across its lifetime, not just
/// the current contents (entries cleared by `clear`/`clear_prefix` still
/// count towards these).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpillStats {
    pub rows_written: u64,
    pub batches_written: u64,
    pub bytes_written: u64,
}

/// The contract every spill store implementation satisfies.
///
/// Invariants (§3.5): order-preserving within a key; batches are
/// append-only; `clear`/`clear_prefix` are idempotent (clearing an absent
/// key or prefix is a no-op, not an error).
pub trait SpillStore: Send + Sync {
    /// Appends one batch under `key`. Never overwrites or reorders
    /// previously appended batches for the same key.
    fn append(&self, key: &str, batch: Batch) -> PqResult<()>;

    /// All batches written under `key` so far, in insertion order. Empty
    /// if the key has never been written or has since been cleared.
    fn read_batches(&self, key: &str) -> PqResult<Vec<Batch>>;

    /// Drops every batch under `key`. A no-op if nothing was there.
    fn clear(&self, key: &str) -> PqResult<()>;

    /// Drops every key starting with `prefix`, used by an operator to
    /// release its whole spill partition in one terminal `finally`.
    fn clear_prefix(&self, prefix: &str) -> PqResult<()>;

    fn stats(&self) -> SpillStats;
}

pub(crate) fn approx_batch_bytes(batch: &Batch) -> u64 {
    // A real size estimate would need the serialized on-disk shape per
    // backend; a stringified-size approximation is all §3.5 asks for.
    serde_json::to_vec(batch).map(|v| v.len() as u64).unwrap_or(0)
}

pub use browser_kv::BrowserKvSpillStore;
pub use memory::MemorySpillStore;
