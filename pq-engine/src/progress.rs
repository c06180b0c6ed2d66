//! Progress events (§6): fire-and-forget notifications the engine emits
//! at cache-hit/miss, source load, operator boundaries, spill
//! transitions, and completion.

use std::sync::Arc;

use pq_table::QueryId;

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    CacheHit { query_id: QueryId },
    CacheMiss { query_id: QueryId },
    SourceBegin { query_id: QueryId },
    SourceEnd { query_id: QueryId },
    OperatorBegin { query_id: QueryId, step_id: String },
    OperatorEnd { query_id: QueryId, step_id: String },
    /// Emitted by the streaming merge build phase when its in-memory
    /// index crosses `maxInMemoryRows` and spills (§4.H).
    StreamSpill { query_id: QueryId, operator: String, phase: String, run_count: Option<usize> },
    /// Emitted once a streaming operator has run, noting whether it ended
    /// up spilling at all.
    StreamOperator { query_id: QueryId, operator: String, spilled: bool },
    Error { query_id: QueryId, message: String },
}

/// A fire-and-forget sink for [`ProgressEvent`]s. `Arc`-wrapped so the
/// same sink can be shared across the recursive dependency-resolution
/// calls a single top-level `execute` makes.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub(crate) fn emit(sink: Option<&ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}
