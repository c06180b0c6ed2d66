//! Cache entries and the table payload split (§3.4).

use pq_value::Value;
use serde::{Deserialize, Serialize};

/// A table result as stored in the cache: either an inline row grid or a
/// reference to a companion Arrow-IPC byte blob (§4.C).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TablePayload {
    Grid { columns: Vec<String>, rows: Vec<Vec<Value>> },
    Arrow { bytes: Vec<u8> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedTable {
    pub version: u32,
    pub table: TablePayload,
    pub meta: serde_json::Value,
}

impl CachedTable {
    pub fn inline(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { version: 2, table: TablePayload::Grid { columns, rows }, meta: serde_json::Value::Null }
    }

    pub fn arrow(bytes: Vec<u8>) -> Self {
        Self { version: 2, table: TablePayload::Arrow { bytes }, meta: serde_json::Value::Null }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: CachedTable,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        match self.expires_at_ms {
            Some(exp) => now_ms < exp,
            None => true,
        }
    }
}
