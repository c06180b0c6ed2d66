//! The query engine (§4.I): `executeQuery` and `executeQueryStreaming`,
//! wired up over a [`Catalog`], a [`CacheStore`], and a [`SourceAdapter`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pq_cache::{CacheEntry, CacheStore, CachedTable, TablePayload};
use pq_cache_key::cache_key;
use pq_errors::{AbortSignal, PqError, PqResult};
use pq_ops::{append, merge};
use pq_stream::{compile_streaming_pipeline, BatchSource, VecBatchSource};
use pq_table::{graph::check_acyclic, Column, DataTable, ITable, Operation, Query, QueryId, SourceDescriptor};
use pq_value::Value;
use tracing::{debug, warn};

use crate::progress::{emit, ProgressEvent, ProgressSink};
use crate::session::ExecutionSession;
use crate::source::SourceAdapter;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// The catalog of queries the engine can execute, keyed by id.
pub type Catalog = HashMap<QueryId, Query>;

#[derive(Clone, Copy, Debug, Default)]
pub struct QueryEngineOptions {
    /// TTL applied to every freshly computed cache entry; `None` means the
    /// entry never expires on its own (still subject to `prune`/eviction).
    pub default_ttl_ms: Option<i64>,
}

/// Ties the query catalog, cache store, and source adapter together behind
/// one `executeQuery`/`executeQueryStreaming` entry point.
pub struct QueryEngine {
    catalog: Catalog,
    cache: Arc<dyn CacheStore>,
    source: Arc<dyn SourceAdapter>,
    options: QueryEngineOptions,
}

impl QueryEngine {
    /// Rejects the catalog up front if its `query`/`merge`/`append` edges
    /// contain a cycle (§3.3): no partial execution ever observes one.
    pub fn new(catalog: Catalog, cache: Arc<dyn CacheStore>, source: Arc<dyn SourceAdapter>) -> PqResult<Self> {
        check_acyclic(&catalog)?;
        Ok(Self { catalog, cache, source, options: QueryEngineOptions::default() })
    }

    pub fn with_options(mut self, options: QueryEngineOptions) -> Self {
        self.options = options;
        self
    }

    fn lookup(&self, id: &QueryId) -> PqResult<Query> {
        self.catalog.get(id).cloned().ok_or_else(|| PqError::contract(format!("unknown query '{}'", id.0)))
    }

    /// `executeQuery` (§4.I): cache lookup, source resolution, operator
    /// application, cache population, in that order. `session` is shared
    /// across a whole refresh so a query referenced by several dependents
    /// (via `query`-source, `merge`, or `append`) runs at most once.
    pub async fn execute_query(
        self: &Arc<Self>,
        query_id: &QueryId,
        params: &serde_json::Value,
        session: &ExecutionSession,
        progress: Option<&ProgressSink>,
        abort: &AbortSignal,
    ) -> PqResult<Arc<DataTable>> {
        session
            .get_or_execute(query_id, || self.execute_uncached(query_id, params, session, progress, abort))
            .await
    }

    async fn execute_uncached(
        &self,
        query_id: &QueryId,
        params: &serde_json::Value,
        session: &ExecutionSession,
        progress: Option<&ProgressSink>,
        abort: &AbortSignal,
    ) -> PqResult<DataTable> {
        abort.check()?;
        let query = self.lookup(query_id)?;
        let key = cache_key(&query, params);

        if let Some(entry) = self.cache.get(&key)? {
            if entry.is_fresh(now_ms()) {
                match hydrate(&entry.value) {
                    Ok(table) => {
                        emit(progress, ProgressEvent::CacheHit { query_id: query_id.clone() });
                        return Ok(table);
                    }
                    Err(err) => {
                        warn!(query = %query_id, error = %err, "cache entry failed to hydrate, treating as a miss");
                    }
                }
            }
        }
        emit(progress, ProgressEvent::CacheMiss { query_id: query_id.clone() });

        emit(progress, ProgressEvent::SourceBegin { query_id: query_id.clone() });
        let mut table = self.resolve_source(&query.source, session, progress, abort).await?;
        emit(progress, ProgressEvent::SourceEnd { query_id: query_id.clone() });

        for step in &query.steps {
            abort.check()?;
            emit(progress, ProgressEvent::OperatorBegin { query_id: query_id.clone(), step_id: step.id.clone() });
            table = self.apply_step(&table, &step.op, session, progress, abort).await?;
            emit(progress, ProgressEvent::OperatorEnd { query_id: query_id.clone(), step_id: step.id.clone() });
        }

        let entry = build_entry(&table, self.options.default_ttl_ms);
        self.cache.set(&key, &entry)?;

        Ok(table)
    }

    async fn resolve_source(
        &self,
        source: &SourceDescriptor,
        session: &ExecutionSession,
        progress: Option<&ProgressSink>,
        abort: &AbortSignal,
    ) -> PqResult<DataTable> {
        match source {
            SourceDescriptor::Query(dep_id) => {
                let dep = self.execute_dependency(dep_id, session, progress, abort).await?;
                Ok((*dep).clone())
            }
            other => self.source.load(other).await,
        }
    }

    /// Executes `dep_id` through the shared session, without going through
    /// `Arc<Self>` (the recursive call happens from inside `&self` methods
    /// that don't have an `Arc` at hand). Returns a boxed future: a
    /// `query`-source, `merge`, or `append` can point back into this same
    /// call chain (`execute_dependency` -> `execute_uncached` ->
    /// `resolve_source`/`apply_step` -> `execute_dependency`), and an
    /// un-boxed `async fn` can't express that self-referential a future
    /// type.
    fn execute_dependency<'a>(
        &'a self,
        dep_id: &'a QueryId,
        session: &'a ExecutionSession,
        progress: Option<&'a ProgressSink>,
        abort: &'a AbortSignal,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = PqResult<Arc<DataTable>>> + Send + 'a>> {
        Box::pin(async move {
            let empty_params = serde_json::Value::Null;
            session
                .get_or_execute(dep_id, || self.execute_uncached(dep_id, &empty_params, session, progress, abort))
                .await
        })
    }

    async fn apply_step(
        &self,
        current: &DataTable,
        op: &Operation,
        session: &ExecutionSession,
        progress: Option<&ProgressSink>,
        abort: &AbortSignal,
    ) -> PqResult<DataTable> {
        match op {
            Operation::Merge { right_query, join_type, left_keys, right_keys, mode } => {
                let right = self.execute_dependency(right_query, session, progress, abort).await?;
                merge::merge(current, right.as_ref(), *join_type, left_keys, right_keys, mode)
            }
            Operation::Append { queries } => {
                let mut resolved = Vec::with_capacity(queries.len());
                for q in queries {
                    resolved.push(self.execute_dependency(q, session, progress, abort).await?);
                }
                let mut refs: Vec<&dyn ITable> = Vec::with_capacity(resolved.len() + 1);
                refs.push(current);
                refs.extend(resolved.iter().map(|t| t.as_ref() as &dyn ITable));
                Ok(append::append(&refs))
            }
            other => pq_ops::apply_operation(current, other),
        }
    }

    /// `executeQueryStreaming` (§4.I): if `query`'s step list is fully
    /// streamable, compiles it and pushes source batches through
    /// `transformBatch`, invoking `on_batch(row_offset, rows)` per batch.
    /// Falls back to materialized [`QueryEngine::execute_query`] otherwise,
    /// reporting the whole result as a single batch. Returns the
    /// materialized table when `materialize` is set, `None` otherwise —
    /// callers only interested in the `on_batch` side effects can skip
    /// paying for accumulation.
    pub async fn execute_query_streaming<F>(
        self: &Arc<Self>,
        query_id: &QueryId,
        params: &serde_json::Value,
        session: &ExecutionSession,
        progress: Option<&ProgressSink>,
        abort: &AbortSignal,
        materialize: bool,
        mut on_batch: F,
    ) -> PqResult<Option<Arc<DataTable>>>
    where
        F: FnMut(usize, &[Vec<Value>]) -> PqResult<()>,
    {
        let query = self.lookup(query_id)?;
        let ops: Vec<Operation> = query.steps.iter().map(|s| s.op.clone()).collect();

        if !query.is_streamable() {
            debug!(query = %query_id, "pipeline not streamable, falling back to materialized execution");
            let table = self.execute_query(query_id, params, session, progress, abort).await?;
            on_batch(0, table.rows())?;
            return Ok(if materialize { Some(table) } else { None });
        }

        let (in_columns, mut batch_source) = match &query.source {
            SourceDescriptor::Query(dep_id) => {
                let dep = self.execute_dependency(dep_id, session, progress, abort).await?;
                let columns = dep.columns().to_vec();
                let rows = dep.rows().to_vec();
                (columns, Box::new(VecBatchSource::new(vec![rows])) as Box<dyn BatchSource>)
            }
            other => self.source.open_stream(other).await?,
        };

        let mut pipeline = compile_streaming_pipeline(&ops, &in_columns)?;
        let mut row_offset = 0usize;
        let mut accumulated: Vec<Vec<Value>> = Vec::new();

        loop {
            abort.check()?;
            let Some(batch) = batch_source.next_batch().await? else { break };
            let result = pipeline.transform_batch(batch)?;
            on_batch(row_offset, &result.rows)?;
            row_offset += result.rows.len();
            if materialize {
                accumulated.extend(result.rows.iter().cloned());
            }
            if result.done {
                break;
            }
        }

        emit(
            progress,
            ProgressEvent::StreamOperator { query_id: query_id.clone(), operator: "pipeline".into(), spilled: false },
        );

        if materialize {
            Ok(Some(Arc::new(DataTable::new(pipeline.out_columns().to_vec(), accumulated))))
        } else {
            Ok(None)
        }
    }
}

fn build_entry(table: &DataTable, default_ttl_ms: Option<i64>) -> CacheEntry {
    let columns = table.column_names();
    let rows = table.rows().to_vec();
    let now = now_ms();
    CacheEntry {
        value: CachedTable::inline(columns, rows),
        created_at_ms: now,
        expires_at_ms: default_ttl_ms.map(|ttl| now + ttl),
    }
}

fn hydrate(cached: &CachedTable) -> PqResult<DataTable> {
    match &cached.table {
        TablePayload::Grid { columns, rows } => {
            Ok(DataTable::new(columns.iter().cloned().map(Column::any).collect(), rows.clone()))
        }
        TablePayload::Arrow { .. } => Err(PqError::Internal(
            "hydrating an Arrow-IPC cache payload is not supported by this engine build".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_cache::MemoryStore;
    use pq_table::{AggFn, AggSpec, Column as C, ColumnType, JoinMode, JoinType, Step};

    use crate::source::InMemorySourceAdapter;

    fn numbers_query(id: &str, path: &str) -> Query {
        Query { id: QueryId(id.into()), source: SourceDescriptor::Csv { path: path.into() }, steps: vec![] }
    }

    fn engine_with(catalog: Catalog, adapter: InMemorySourceAdapter) -> (Arc<QueryEngine>, Arc<MemoryStore>) {
        let cache = Arc::new(MemoryStore::new());
        let engine = Arc::new(QueryEngine::new(catalog, cache.clone(), Arc::new(adapter)).unwrap());
        (engine, cache)
    }

    #[tokio::test]
    async fn executes_a_plain_source_query_and_populates_the_cache() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "a.csv",
            DataTable::new(vec![C::new("x", ColumnType::Number)], vec![vec![Value::Number(1.0)]]),
        );
        let mut catalog = Catalog::new();
        catalog.insert(QueryId("q1".into()), numbers_query("q1", "a.csv"));
        let (engine, cache) = engine_with(catalog, adapter);

        let session = ExecutionSession::new();
        let table = engine
            .execute_query(&QueryId("q1".into()), &serde_json::json!({}), &session, None, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(table.row_count(), 1);

        let key = cache_key(
            &Query { id: QueryId("q1".into()), source: SourceDescriptor::Csv { path: "a.csv".into() }, steps: vec![] },
            &serde_json::json!({}),
        );
        assert!(cache.get(&key).unwrap().is_some());
    }

    #[tokio::test]
    async fn merge_resolves_the_right_query_through_the_session() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "left.csv",
            DataTable::new(
                vec![C::any("id"), C::any("name")],
                vec![vec![Value::Number(1.0), Value::Text("a".into())]],
            ),
        );
        adapter.register(
            "right.csv",
            DataTable::new(
                vec![C::any("id"), C::any("score")],
                vec![vec![Value::Number(1.0), Value::Number(9.0)]],
            ),
        );

        let mut catalog = Catalog::new();
        catalog.insert(QueryId("right".into()), numbers_query("right", "right.csv"));
        catalog.insert(
            QueryId("left".into()),
            Query {
                id: QueryId("left".into()),
                source: SourceDescriptor::Csv { path: "left.csv".into() },
                steps: vec![Step {
                    id: "s1".into(),
                    name: "merge".into(),
                    op: Operation::Merge {
                        right_query: QueryId("right".into()),
                        join_type: JoinType::Inner,
                        left_keys: vec!["id".into()],
                        right_keys: vec!["id".into()],
                        mode: JoinMode::Flat,
                    },
                }],
            },
        );
        let (engine, _cache) = engine_with(catalog, adapter);

        let session = ExecutionSession::new();
        let table = engine
            .execute_query(&QueryId("left".into()), &serde_json::json!({}), &session, None, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(table.column_names(), vec!["id", "name", "score"]);
        assert_eq!(table.row_count(), 1);
    }

    #[tokio::test]
    async fn a_query_shared_by_two_dependents_executes_once_per_session() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "shared.csv",
            DataTable::new(vec![C::any("x")], vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)]]),
        );
        adapter.register("dummy.csv", DataTable::new(vec![C::any("x")], vec![vec![Value::Number(0.0)]]));

        let mut catalog = Catalog::new();
        catalog.insert(QueryId("shared".into()), numbers_query("shared", "shared.csv"));
        catalog.insert(
            QueryId("a".into()),
            Query {
                id: QueryId("a".into()),
                source: SourceDescriptor::Csv { path: "dummy.csv".into() },
                steps: vec![Step {
                    id: "s1".into(),
                    name: "append".into(),
                    op: Operation::Append { queries: vec![QueryId("shared".into())] },
                }],
            },
        );
        let (engine, _cache) = engine_with(catalog, adapter);

        let session = ExecutionSession::new();
        let abort = AbortSignal::new();
        let via_a =
            engine.execute_query(&QueryId("a".into()), &serde_json::json!({}), &session, None, &abort).await.unwrap();
        let direct = engine
            .execute_query(&QueryId("shared".into()), &serde_json::json!({}), &session, None, &abort)
            .await
            .unwrap();
        assert_eq!(direct.row_count(), 2);
        assert_eq!(via_a.row_count(), 3);
    }

    #[tokio::test]
    async fn group_by_applies_as_a_regular_step() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "a.csv",
            DataTable::new(
                vec![C::any("k"), C::any("v")],
                vec![
                    vec![Value::Text("a".into()), Value::Number(1.0)],
                    vec![Value::Text("a".into()), Value::Number(2.0)],
                ],
            ),
        );
        let mut catalog = Catalog::new();
        catalog.insert(
            QueryId("q1".into()),
            Query {
                id: QueryId("q1".into()),
                source: SourceDescriptor::Csv { path: "a.csv".into() },
                steps: vec![Step {
                    id: "s1".into(),
                    name: "group".into(),
                    op: Operation::GroupBy {
                        keys: vec!["k".into()],
                        aggs: vec![AggSpec { source_column: "v".into(), agg: AggFn::Sum, output_name: "total".into() }],
                    },
                }],
            },
        );
        let (engine, _cache) = engine_with(catalog, adapter);

        let session = ExecutionSession::new();
        let table = engine
            .execute_query(&QueryId("q1".into()), &serde_json::json!({}), &session, None, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.get_cell(0, 1), Value::Number(3.0));
    }

    #[tokio::test]
    async fn streaming_execution_reports_batches_and_can_materialize() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "a.csv",
            DataTable::new(
                vec![C::new("x", ColumnType::Number)],
                vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)], vec![Value::Number(3.0)]],
            ),
        );
        let mut catalog = Catalog::new();
        catalog.insert(
            QueryId("q1".into()),
            Query {
                id: QueryId("q1".into()),
                source: SourceDescriptor::Csv { path: "a.csv".into() },
                steps: vec![Step { id: "s1".into(), name: "take".into(), op: Operation::Take(2) }],
            },
        );
        let (engine, _cache) = engine_with(catalog, adapter);

        let session = ExecutionSession::new();
        let mut seen = 0usize;
        let table = engine
            .execute_query_streaming(
                &QueryId("q1".into()),
                &serde_json::json!({}),
                &session,
                None,
                &AbortSignal::new(),
                true,
                |_offset, rows| {
                    seen += rows.len();
                    Ok(())
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(table.row_count(), 2);
    }
}
