//! Content-addressed cache stores, key ring, and encryption (§3.4, §4.C).
//!
//! Four implementations share the [`CacheStore`] contract: [`MemoryStore`],
//! [`FsStore`], [`EncryptedFsStore`], and [`BrowserKvStore`]. All of them
//! treat any parse/decrypt/I/O failure on a single entry as a cache miss,
//! never as a propagated error, and best-effort delete the offending file.

pub mod browser_kv;
pub mod encrypted_fs;
pub mod entry;
pub mod fs;
pub mod key_ring;
pub mod memory;
pub mod store;

pub use browser_kv::BrowserKvStore;
pub use encrypted_fs::EncryptedFsStore;
pub use entry::{CacheEntry, CachedTable, TablePayload};
pub use fs::FsStore;
pub use key_ring::KeyRing;
pub use memory::MemoryStore;
pub use store::{CacheStore, PruneOptions};
