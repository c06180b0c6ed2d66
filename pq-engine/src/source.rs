//! The source adapter contract (§6): concrete CSV/JSON/Arrow/Parquet/
//! HTTP/SQL adapters are external collaborators, explicitly out of scope
//! (§1) — this module only pins down the interface the engine calls
//! through, plus an in-memory test double.

use async_trait::async_trait;
use pq_errors::PqResult;
use pq_table::{Column, DataTable, ITable, SourceDescriptor};
use pq_stream::{BatchSource, VecBatchSource};

#[derive(Clone, Debug, Default)]
pub struct CsvOptions {
    pub has_headers: bool,
    pub delimiter: u8,
}

#[derive(Clone, Debug, Default)]
pub struct JsonOptions {
    pub json_path: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ParquetOptions {
    pub batch_size: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct HttpOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default)]
pub struct SqlOptions {
    pub params: Vec<String>,
}

/// The contract every concrete source adapter satisfies. Each eager
/// method reads the whole source into a [`DataTable`]; [`SourceAdapter::open_stream`]
/// is the streaming counterpart the engine prefers whenever the
/// requested pipeline is streamable (§4.E), returning the source's
/// output schema up front plus a pull-based batch source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn read_csv(&self, path: &str, opts: &CsvOptions) -> PqResult<DataTable>;
    async fn read_json(&self, path: &str, opts: &JsonOptions) -> PqResult<DataTable>;
    async fn read_arrow(&self, uri: &str) -> PqResult<DataTable>;
    async fn read_parquet(&self, uri: &str, opts: &ParquetOptions) -> PqResult<DataTable>;
    async fn http_table(&self, url: &str, opts: &HttpOptions) -> PqResult<DataTable>;
    async fn sql_query(&self, connection: &str, statement: &str, opts: &SqlOptions) -> PqResult<DataTable>;

    /// Dispatches on the descriptor's variant. `SourceDescriptor::Query`
    /// is never passed here: the engine resolves query-sources itself by
    /// recursively executing the upstream query.
    async fn load(&self, source: &SourceDescriptor) -> PqResult<DataTable> {
        match source {
            SourceDescriptor::Csv { path } => self.read_csv(path, &CsvOptions::default()).await,
            SourceDescriptor::Json { path } => self.read_json(path, &JsonOptions::default()).await,
            SourceDescriptor::Arrow { uri } => self.read_arrow(uri).await,
            SourceDescriptor::Parquet { uri } => self.read_parquet(uri, &ParquetOptions::default()).await,
            SourceDescriptor::Http { url } => self.http_table(url, &HttpOptions::default()).await,
            SourceDescriptor::Sql { connection, statement } => {
                self.sql_query(connection, statement, &SqlOptions::default()).await
            }
            SourceDescriptor::Query(id) => Err(pq_errors::PqError::contract(format!(
                "source adapter cannot resolve a query-source directly (query '{}'); the engine must resolve it",
                id.0
            ))),
        }
    }

    /// Streaming counterpart of [`SourceAdapter::load`]. The default
    /// implementation eagerly loads the whole table and wraps its rows as
    /// a single in-memory batch source — a correct but non-streaming
    /// fallback. Adapters capable of true incremental reads (e.g. a CSV
    /// reader pulling lines lazily) should override this to bound memory.
    async fn open_stream(&self, source: &SourceDescriptor) -> PqResult<(Vec<Column>, Box<dyn BatchSource>)> {
        let table = self.load(source).await?;
        let columns = table.columns().to_vec();
        let rows = table.into_rows();
        Ok((columns, Box::new(VecBatchSource::new(vec![rows]))))
    }
}

/// An in-memory adapter keyed by a descriptor's path/uri/url/connection
/// string, useful for tests and for embedding hosts that have already
/// materialized their inputs (e.g. from a prior refresh step).
#[derive(Default)]
pub struct InMemorySourceAdapter {
    tables: std::sync::Mutex<std::collections::HashMap<String, DataTable>>,
}

impl InMemorySourceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, table: DataTable) {
        self.tables.lock().unwrap().insert(key.into(), table);
    }

    fn get(&self, key: &str) -> PqResult<DataTable> {
        self.tables
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| pq_errors::PqError::source(format!("no table registered for '{key}'")))
    }
}

#[async_trait]
impl SourceAdapter for InMemorySourceAdapter {
    async fn read_csv(&self, path: &str, _opts: &CsvOptions) -> PqResult<DataTable> {
        self.get(path)
    }

    async fn read_json(&self, path: &str, _opts: &JsonOptions) -> PqResult<DataTable> {
        self.get(path)
    }

    async fn read_arrow(&self, uri: &str) -> PqResult<DataTable> {
        self.get(uri)
    }

    async fn read_parquet(&self, uri: &str, _opts: &ParquetOptions) -> PqResult<DataTable> {
        self.get(uri)
    }

    async fn http_table(&self, url: &str, _opts: &HttpOptions) -> PqResult<DataTable> {
        self.get(url)
    }

    async fn sql_query(&self, connection: &str, _statement: &str, _opts: &SqlOptions) -> PqResult<DataTable> {
        self.get(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::{Column, ColumnType, ITable};
    use pq_value::Value;

    #[tokio::test]
    async fn in_memory_adapter_serves_registered_tables() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "a.csv",
            DataTable::new(vec![Column::new("x", ColumnType::Number)], vec![vec![Value::Number(1.0)]]),
        );
        let table = adapter.load(&SourceDescriptor::Csv { path: "a.csv".into() }).await.unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[tokio::test]
    async fn default_open_stream_wraps_the_whole_table_as_one_batch() {
        let adapter = InMemorySourceAdapter::new();
        adapter.register(
            "a.csv",
            DataTable::new(vec![Column::new("x", ColumnType::Number)], vec![vec![Value::Number(1.0)]]),
        );
        let (columns, mut stream) =
            adapter.open_stream(&SourceDescriptor::Csv { path: "a.csv".into() }).await.unwrap();
        assert_eq!(columns.len(), 1);
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(stream.next_batch().await.unwrap().is_none());
    }
}
