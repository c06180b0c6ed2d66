//! Streaming operator pipeline, external sort, and spill-backed
//! group-by/join (§4.E–§4.H).

pub mod compile;
pub mod external_sort;
pub mod streaming_group_by;
pub mod streaming_merge;
pub mod streaming_sort;

pub use compile::{compile_streaming_pipeline, is_streamable, CompiledPipeline, StreamBatchResult};
pub use external_sort::{external_sort_batches, BatchSource, Comparator, ExternalSortLimits, Row, VecBatchSource};
pub use streaming_group_by::streaming_group_by;
pub use streaming_merge::streaming_merge;
pub use streaming_sort::streaming_sort;
