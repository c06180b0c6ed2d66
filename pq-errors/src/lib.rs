//! Shared error type for the power-query workspace.
//!
//! Every fallible entry point in every `pq-*` crate returns
//! [`PqResult`]. The variants here map directly onto the error kinds
//! described in the engine's error-handling design: contract violations,
//! source-adapter failures, spill failures, and cooperative cancellation.
//! Cache corruption and offload-kernel failures are deliberately *not*
//! represented here: both are handled internally (treated as a cache miss,
//! or as a transparent CPU fallback) and never surface as a [`PqError`].

use std::fmt;

/// The workspace-wide result alias.
pub type PqResult<T> = Result<T, PqError>;

/// An error produced anywhere in the power-query pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PqError {
    /// A step references an unknown column, a coercion received an
    /// unsupported input, a join's key counts mismatch, or some other
    /// precondition baked into an operator's contract was violated.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A source adapter (CSV/JSON/Arrow/Parquet/HTTP/SQL) failed to read or
    /// parse its input.
    #[error("source failure: {0}")]
    Source(String),

    /// Writing to or reading from the spill store failed. Fatal to the
    /// operator that requested it; bubbles straight up.
    #[error("spill failure: {0}")]
    Spill(String),

    /// A dependency cycle was found in a query's source graph before any
    /// execution began. Carries the cycle as a path of query ids.
    #[error("cyclic query dependency: {}", path.join(" -> "))]
    CyclicDependency {
        /// The offending path, starting and ending at the same query id.
        path: Vec<String>,
    },

    /// Cooperative cancellation: raised at a suspension point after the
    /// caller's abort signal was observed set. Distinguishable from every
    /// other error kind so callers can special-case it.
    #[error("aborted")]
    Aborted,

    /// Anything else: wrapped I/O errors, serialization failures that are
    /// not cache corruption (e.g. a caller-supplied config blob), etc.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PqError {
    /// True for [`PqError::Aborted`], the one kind that callers are
    /// expected to special-case rather than report as a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PqError::Aborted)
    }

    /// Build a [`PqError::Contract`] from anything `Display`-able.
    pub fn contract(msg: impl fmt::Display) -> Self {
        PqError::Contract(msg.to_string())
    }

    /// Build a [`PqError::Source`] from anything `Display`-able.
    pub fn source(msg: impl fmt::Display) -> Self {
        PqError::Source(msg.to_string())
    }

    /// Build a [`PqError::Spill`] from anything `Display`-able.
    pub fn spill(msg: impl fmt::Display) -> Self {
        PqError::Spill(msg.to_string())
    }
}

impl From<std::io::Error> for PqError {
    fn from(e: std::io::Error) -> Self {
        PqError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for PqError {
    fn from(e: serde_json::Error) -> Self {
        PqError::Internal(e.to_string())
    }
}

/// A cooperative abort signal, checked at every suspension point described
/// in the concurrency model: streaming batch boundaries, spill I/O, offload
/// kernel submissions, and source adapter calls.
#[derive(Clone, Default)]
pub struct AbortSignal(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl AbortSignal {
    /// A fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal as set. Idempotent.
    pub fn abort(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// True once [`AbortSignal::abort`] has been called.
    pub fn is_set(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Check the signal, returning [`PqError::Aborted`] if it is set. Call
    /// this at every suspension point.
    pub fn check(&self) -> PqResult<()> {
        if self.is_set() {
            Err(PqError::Aborted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_signal_round_trips() {
        let sig = AbortSignal::new();
        assert!(sig.check().is_ok());
        sig.abort();
        assert!(sig.check().unwrap_err().is_aborted());
    }

    #[test]
    fn cyclic_dependency_formats_path() {
        let err = PqError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic query dependency: a -> b -> a");
    }
}
