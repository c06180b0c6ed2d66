//! Query execution: source dispatch, cache orchestration, progress events,
//! and the per-refresh execution session (§4.I, §6).
//!
//! `pq-table` defines the query model, `pq-ops`/`pq-stream` the operators,
//! `pq-cache`/`pq-cache-key` the cache, `pq-kernel` the numeric kernels a
//! `groupBy`/hash-join step could be backed by. This crate is the one place
//! that knows how to run a whole query end to end against those pieces.

pub mod engine;
pub mod progress;
pub mod session;
pub mod source;

pub use engine::{Catalog, QueryEngine, QueryEngineOptions};
pub use progress::{ProgressEvent, ProgressSink};
pub use session::ExecutionSession;
pub use source::{CsvOptions, HttpOptions, InMemorySourceAdapter, JsonOptions, ParquetOptions, SourceAdapter, SqlOptions};
