//! Cache keying (§4.B): deterministic canonical stringification of a
//! query plus its parameter overrides, reduced to a content-addressed
//! FNV-1a64 hex key.

pub mod canonical;
pub mod circular;
pub mod fnv;
pub mod query_canonical;

pub use canonical::{Canonical, Canonicalize};
pub use fnv::fnv1a64;

use pq_table::Query;

/// The full cache key for a query, combining the query AST (source +
/// steps) with any host-supplied parameter overrides.
pub fn cache_key(query: &Query, params: &serde_json::Value) -> String {
    let combined = Canonical::object(vec![
        ("query".into(), query.canonicalize()),
        ("params".into(), params.canonicalize()),
    ]);
    fnv1a64(&canonical::stable_stringify(&combined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::{Query, QueryId, SourceDescriptor};

    #[test]
    fn identical_queries_produce_identical_keys() {
        let q = Query {
            id: QueryId("q1".into()),
            source: SourceDescriptor::Csv { path: "a.csv".into() },
            steps: vec![],
        };
        let params = serde_json::json!({});
        assert_eq!(cache_key(&q, &params), cache_key(&q, &params));
    }

    #[test]
    fn different_params_change_the_key() {
        let q = Query {
            id: QueryId("q1".into()),
            source: SourceDescriptor::Csv { path: "a.csv".into() },
            steps: vec![],
        };
        let a = cache_key(&q, &serde_json::json!({"x": 1}));
        let b = cache_key(&q, &serde_json::json!({"x": 2}));
        assert_ne!(a, b);
    }
}
