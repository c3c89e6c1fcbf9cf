//! Test case result ingestion and the status rollup onto the parent test case.
//!
//! Results are appended to the primary store's history, indexed through the
//! propagation queue, and folded into the test case's `testCaseResult`
//! pointer and `testCaseStatus` field. Ingestion for one test case is
//! serialized so interleaved creates and deletes always settle against the
//! history they observed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use searchsync_core::rollup::settle;
use searchsync_core::validate::{
    format_timestamp, require, validate_range, validate_timestamp_millis,
};
use searchsync_core::{
    Change, CreateTestCaseResult, Document, EntityHeader, PropagationTarget, ResultOperation,
    RollupState, Selector, StatusPointer, TestCaseResult, TestCaseResultPatch, TestCaseStatus,
    Transition, ValidationError,
};

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::primary::{EntityRecord, Include};

pub const TEST_CASE_TYPE: &str = "testCase";
pub const TEST_CASE_RESULT_TYPE: &str = "testCaseResult";

/// Field on the test case holding the [`StatusPointer`].
pub const POINTER_FIELD: &str = "testCaseResult";
/// Field on the test case mirroring the pointer's status.
pub const STATUS_FIELD: &str = "testCaseStatus";

pub struct ResultService {
    engine: Arc<SyncEngine>,
    locks: IngestLocks,
}

type IngestLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

fn lock_map(locks: &IngestLocks) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held for the duration of one ingestion call.
struct IngestGuard<'a> {
    locks: &'a IngestLocks,
    fqn: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IngestGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_map(self.locks);
        // Only the map and this guard still point at the mutex.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.fqn);
        }
    }
}

impl ResultService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        ResultService {
            engine,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Serialize ingestion for one test case. The map entry is dropped
    /// once no caller holds or waits on it.
    async fn lock(&self, test_case_fqn: &str) -> IngestGuard<'_> {
        let lock = {
            let mut locks = lock_map(&self.locks);
            Arc::clone(locks.entry(test_case_fqn.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        IngestGuard {
            locks: &self.locks,
            fqn: test_case_fqn.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        lock_map(&self.locks).len()
    }

    async fn test_case(&self, test_case_fqn: &str, include: Include) -> Result<EntityRecord, SyncError> {
        require("testCaseFQN", test_case_fqn)?;
        Ok(self
            .engine
            .primary()
            .get_entity_by_name(TEST_CASE_TYPE, test_case_fqn, include)
            .await?)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Record a new result and move the test case's pointer if it is the
    /// latest.
    ///
    /// The history append and the rollup are primary-store writes and fail
    /// the call. Indexing the result document is queued; an index-side
    /// failure is logged and the primary state stands.
    pub async fn add_result(
        &self,
        test_case_fqn: &str,
        request: &CreateTestCaseResult,
    ) -> Result<TestCaseResult, SyncError> {
        validate_timestamp_millis(request.timestamp)?;
        self.test_case(test_case_fqn, Include::NonDeleted).await?;
        let _guard = self.lock(test_case_fqn).await;
        let test_case = self.test_case(test_case_fqn, Include::NonDeleted).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut result = TestCaseResult::from_request(&id, test_case_fqn, request);
        let primary = self.engine.primary();
        let mut opened_incident = false;
        result.incident_id = None;
        if result.test_case_status == TestCaseStatus::Failed {
            let incident = match primary.current_incident(test_case_fqn).await? {
                Some(open) => open,
                None => {
                    opened_incident = true;
                    primary.open_incident(test_case_fqn).await?
                }
            };
            result.incident_id = Some(incident);
        }

        if let Err(e) = primary.append_result(result.clone()).await {
            if opened_incident {
                if let Err(undo) = primary.resolve_incident(test_case_fqn).await {
                    tracing::error!(test_case = test_case_fqn, error = %undo, "incident left open");
                }
            }
            return Err(e.into());
        }
        if result.test_case_status == TestCaseStatus::Success {
            if let Some(incident) = primary.resolve_incident(test_case_fqn).await? {
                tracing::info!(test_case = test_case_fqn, incident = %incident, "incident resolved");
            }
            primary.delete_failed_rows_sample(test_case_fqn).await?;
        }

        let state = rollup_state(&test_case);
        let transition = state.on_event(&result, ResultOperation::Create);
        self.roll_up(&test_case, state, transition).await?;
        self.index_result(&test_case, &result).await;
        tracing::debug!(
            test_case = test_case_fqn,
            timestamp = result.timestamp,
            status = %result.test_case_status,
            "result added"
        );
        Ok(result)
    }

    /// Correct the result stored at `timestamp`, keeping its id.
    pub async fn update_result(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
        patch: &TestCaseResultPatch,
    ) -> Result<TestCaseResult, SyncError> {
        validate_timestamp_millis(timestamp)?;
        let _guard = self.lock(test_case_fqn).await;
        let test_case = self.test_case(test_case_fqn, Include::NonDeleted).await?;
        let primary = self.engine.primary();
        let existing = primary
            .result_at(test_case_fqn, timestamp)
            .await?
            .ok_or_else(|| result_not_found(test_case_fqn, timestamp))?;

        let updated = existing.patched(patch);
        primary.delete_result_at(test_case_fqn, timestamp).await?;
        if let Err(e) = primary.append_result(updated.clone()).await {
            if let Err(undo) = primary.append_result(existing).await {
                tracing::error!(test_case = test_case_fqn, timestamp, error = %undo, "result lost during update");
            }
            return Err(e.into());
        }

        let state = rollup_state(&test_case);
        let transition = state.on_event(&updated, ResultOperation::Update);
        self.roll_up(&test_case, state, transition).await?;
        self.index_result(&test_case, &updated).await;
        Ok(updated)
    }

    /// Remove the result stored at `timestamp`. Deleting the latest result
    /// walks the pointer back to the newest remaining one.
    pub async fn delete_result(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<TestCaseResult, SyncError> {
        let _guard = self.lock(test_case_fqn).await;
        let test_case = self.test_case(test_case_fqn, Include::All).await?;
        let removed = self
            .engine
            .primary()
            .delete_result_at(test_case_fqn, timestamp)
            .await?;

        let state = rollup_state(&test_case);
        let transition = state.on_event(&removed, ResultOperation::Delete);
        self.roll_up(&test_case, state, transition).await?;

        let label = format!("resultDeleted {test_case_fqn}@{timestamp}");
        let queued = match self.engine.index_for(TEST_CASE_RESULT_TYPE) {
            Ok(index) => {
                let target = PropagationTarget::delete(index, Selector::id(&removed.id));
                self.engine.enqueue(label, vec![target]).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            tracing::warn!(test_case = test_case_fqn, timestamp, error = %e, "result document not removed from index");
        }
        Ok(removed)
    }

    /// Attach a failed-rows sample to a test case whose latest result failed.
    pub async fn add_failed_rows_sample(
        &self,
        test_case_fqn: &str,
        sample: Value,
    ) -> Result<(), SyncError> {
        let test_case = self.test_case(test_case_fqn, Include::NonDeleted).await?;
        let failing = rollup_state(&test_case)
            .pointer()
            .is_some_and(|p| p.status == TestCaseStatus::Failed);
        if !failing {
            return Err(ValidationError::NotFailing {
                test_case_fqn: test_case_fqn.to_string(),
            }
            .into());
        }
        self.engine
            .primary()
            .put_failed_rows_sample(test_case_fqn, sample)
            .await?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// History between the optional bounds, newest first. Results sharing a
    /// timestamp come out most recently ingested first.
    pub async fn list_results(
        &self,
        test_case_fqn: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<TestCaseResult>, SyncError> {
        validate_range(start, end)?;
        self.test_case(test_case_fqn, Include::All).await?;
        let mut history = self
            .engine
            .primary()
            .results_in_range(
                test_case_fqn,
                start.unwrap_or(i64::MIN),
                end.unwrap_or(i64::MAX),
            )
            .await?;
        history.reverse();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(history)
    }

    pub async fn latest(&self, test_case_fqn: &str) -> Result<Option<StatusPointer>, SyncError> {
        let test_case = self.test_case(test_case_fqn, Include::All).await?;
        Ok(rollup_state(&test_case).into_pointer())
    }

    pub async fn failed_rows_sample(&self, test_case_fqn: &str) -> Result<Option<Value>, SyncError> {
        self.test_case(test_case_fqn, Include::All).await?;
        Ok(self
            .engine
            .primary()
            .failed_rows_sample(test_case_fqn)
            .await?)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Queue the result document. Failures are logged only.
    async fn index_result(&self, test_case: &EntityRecord, result: &TestCaseResult) {
        let header = EntityHeader::new(TEST_CASE_RESULT_TYPE, &result.id, &result.test_case_fqn);
        let change = Change::EntityCreated {
            entity: header,
            document: result_document(test_case, result),
        };
        if let Err(e) = self.engine.propagate(&change).await {
            tracing::warn!(
                test_case = %result.test_case_fqn,
                timestamp = result.timestamp,
                error = %e,
                "result document not indexed"
            );
        }
    }

    /// Settle a transition and write the pointer and status onto the test
    /// case when they moved.
    async fn roll_up(
        &self,
        test_case: &EntityRecord,
        state: RollupState,
        transition: Transition,
    ) -> Result<(), SyncError> {
        let history = if transition == Transition::Recompute {
            self.engine
                .primary()
                .results_in_range(&test_case.header.fqn, i64::MIN, i64::MAX)
                .await?
        } else {
            Vec::new()
        };
        let next = settle(&state, transition, &history);
        if next == state {
            return Ok(());
        }
        let mut patch = Document::new();
        match next.pointer() {
            Some(pointer) => {
                patch.insert(POINTER_FIELD.to_string(), pointer.to_value());
                patch.insert(STATUS_FIELD.to_string(), json!(pointer.status.as_str()));
            }
            None => {
                patch.insert(POINTER_FIELD.to_string(), Value::Null);
                patch.insert(STATUS_FIELD.to_string(), Value::Null);
            }
        }
        tracing::debug!(
            test_case = %test_case.header.fqn,
            latest = ?next.pointer().map(|p| format_timestamp(p.timestamp)),
            "status pointer moved"
        );
        self.engine
            .update_entity(TEST_CASE_TYPE, &test_case.header.id, &patch)
            .await?;
        Ok(())
    }
}

fn rollup_state(test_case: &EntityRecord) -> RollupState {
    RollupState::from_pointer(
        test_case
            .fields
            .get(POINTER_FIELD)
            .and_then(StatusPointer::from_value),
    )
}

fn result_not_found(test_case_fqn: &str, timestamp: i64) -> SyncError {
    SyncError::NotFound(format!(
        "no result for test case {test_case_fqn} at {timestamp}"
    ))
}

/// The indexed form of a result: its own fields plus a reference to the
/// test case, which the hierarchy uses to cascade deletes.
fn result_document(test_case: &EntityRecord, result: &TestCaseResult) -> Document {
    let mut doc = match serde_json::to_value(result) {
        Ok(Value::Object(map)) => map,
        _ => Document::new(),
    };
    doc.insert(
        TEST_CASE_TYPE.to_string(),
        json!({
            "id": test_case.header.id,
            "type": TEST_CASE_TYPE,
            "fullyQualifiedName": test_case.header.fqn,
        }),
    );
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::primary::MemoryPrimaryStore;
    use searchsync_index::MemoryBackend;

    const FQN: &str = "svc.db.schema.orders.row_count";
    const T0: i64 = 1_700_000_000_000;

    async fn service() -> ResultService {
        let engine = SyncEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryPrimaryStore::new()),
            Arc::new(MemoryBackend::new()),
        )
        .unwrap();
        engine.bootstrap().await.unwrap();
        engine
            .create_entity(EntityRecord::new(
                EntityHeader::new(TEST_CASE_TYPE, "tc-1", FQN),
                Document::new(),
            ))
            .await
            .unwrap();
        ResultService::new(Arc::new(engine))
    }

    fn req(offset: i64, status: TestCaseStatus) -> CreateTestCaseResult {
        CreateTestCaseResult::new(T0 + offset, status)
    }

    #[tokio::test]
    async fn later_result_wins_and_earlier_does_not_override() {
        let svc = service().await;
        svc.add_result(FQN, &req(100, TestCaseStatus::Success)).await.unwrap();
        svc.add_result(FQN, &req(90, TestCaseStatus::Failed)).await.unwrap();
        let latest = svc.latest(FQN).await.unwrap().unwrap();
        assert_eq!((latest.timestamp, latest.status), (T0 + 100, TestCaseStatus::Success));
    }

    #[tokio::test]
    async fn deleting_latest_walks_back_then_clears() {
        let svc = service().await;
        svc.add_result(FQN, &req(1, TestCaseStatus::Failed)).await.unwrap();
        svc.add_result(FQN, &req(2, TestCaseStatus::Success)).await.unwrap();
        svc.delete_result(FQN, T0 + 2).await.unwrap();
        let latest = svc.latest(FQN).await.unwrap().unwrap();
        assert_eq!(latest.status, TestCaseStatus::Failed);

        svc.delete_result(FQN, T0 + 1).await.unwrap();
        assert!(svc.latest(FQN).await.unwrap().is_none());
        let record = svc
            .engine()
            .get_entity(TEST_CASE_TYPE, "tc-1", &[STATUS_FIELD], Include::NonDeleted)
            .await
            .unwrap();
        assert!(!record.contains_key(STATUS_FIELD));
    }

    #[tokio::test]
    async fn delete_at_unknown_timestamp_is_not_found() {
        let svc = service().await;
        let err = svc.delete_result(FQN, T0).await.unwrap_err();
        assert!(err.is_user_visible_not_found());
    }

    #[tokio::test]
    async fn unknown_test_case_is_not_found() {
        let svc = service().await;
        let err = svc
            .add_result("no.such.case", &req(0, TestCaseStatus::Success))
            .await
            .unwrap_err();
        assert!(err.is_user_visible_not_found());
    }

    #[tokio::test]
    async fn second_precision_timestamp_is_rejected() {
        let svc = service().await;
        let bad = CreateTestCaseResult::new(1_700_000_000, TestCaseStatus::Success);
        let err = svc.add_result(FQN, &bad).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(ValidationError::InvalidTimestamp { .. })));
        assert!(svc.list_results(FQN, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_share_one_incident_until_success() {
        let svc = service().await;
        let a = svc.add_result(FQN, &req(1, TestCaseStatus::Failed)).await.unwrap();
        let b = svc.add_result(FQN, &req(2, TestCaseStatus::Failed)).await.unwrap();
        assert!(a.incident_id.is_some());
        assert_eq!(a.incident_id, b.incident_id);

        let ok = svc.add_result(FQN, &req(3, TestCaseStatus::Success)).await.unwrap();
        assert!(ok.incident_id.is_none());
        let c = svc.add_result(FQN, &req(4, TestCaseStatus::Failed)).await.unwrap();
        assert_ne!(c.incident_id, a.incident_id);
    }

    #[tokio::test]
    async fn failed_rows_sample_requires_failing_case_and_clears_on_success() {
        let svc = service().await;
        let sample = json!({"columns": ["id"], "rows": [[1]]});
        svc.add_result(FQN, &req(1, TestCaseStatus::Success)).await.unwrap();
        let err = svc
            .add_failed_rows_sample(FQN, sample.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(ValidationError::NotFailing { .. })));

        svc.add_result(FQN, &req(2, TestCaseStatus::Failed)).await.unwrap();
        svc.add_failed_rows_sample(FQN, sample.clone()).await.unwrap();
        assert_eq!(svc.failed_rows_sample(FQN).await.unwrap(), Some(sample));

        svc.add_result(FQN, &req(3, TestCaseStatus::Success)).await.unwrap();
        assert_eq!(svc.failed_rows_sample(FQN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_is_newest_first_within_bounds() {
        let svc = service().await;
        for offset in [10, 30, 20] {
            svc.add_result(FQN, &req(offset, TestCaseStatus::Success)).await.unwrap();
        }
        let all: Vec<i64> = svc
            .list_results(FQN, None, None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp - T0)
            .collect();
        assert_eq!(all, vec![30, 20, 10]);

        let bounded = svc.list_results(FQN, Some(T0 + 15), Some(T0 + 30)).await.unwrap();
        assert_eq!(bounded.len(), 2);
        assert!(svc.list_results(FQN, Some(T0 + 30), Some(T0)).await.is_err());
    }

    #[tokio::test]
    async fn update_changes_status_of_latest() {
        let svc = service().await;
        svc.add_result(FQN, &req(5, TestCaseStatus::Queued)).await.unwrap();
        let patch = TestCaseResultPatch {
            test_case_status: Some(TestCaseStatus::Failed),
            ..TestCaseResultPatch::default()
        };
        let updated = svc.update_result(FQN, T0 + 5, &patch).await.unwrap();
        assert_eq!(updated.test_case_status, TestCaseStatus::Failed);
        assert_eq!(
            svc.latest(FQN).await.unwrap().unwrap().status,
            TestCaseStatus::Failed
        );
        assert_eq!(svc.list_results(FQN, None, None).await.unwrap().len(), 1);

        let err = svc.update_result(FQN, T0 + 6, &patch).await.unwrap_err();
        assert!(err.is_user_visible_not_found());
    }

    #[tokio::test]
    async fn result_documents_reach_the_index() {
        let svc = service().await;
        let r = svc.add_result(FQN, &req(1, TestCaseStatus::Failed)).await.unwrap();
        svc.engine().flush().await.unwrap();
        let backend = svc.engine().backend();
        let doc = backend
            .get_document("test_case_result_search_index", &r.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["testCase"]["id"], "tc-1");
        assert_eq!(doc["testCaseStatus"], "Failed");

        let case = backend
            .get_document("test_case_search_index", "tc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(case[STATUS_FIELD], "Failed");

        svc.delete_result(FQN, T0 + 1).await.unwrap();
        svc.engine().flush().await.unwrap();
        assert!(backend
            .get_document("test_case_result_search_index", &r.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rollup_lands_even_when_the_queue_is_closed() {
        let svc = service().await;
        svc.engine().shutdown().await;
        let r = svc.add_result(FQN, &req(1, TestCaseStatus::Failed)).await.unwrap();
        assert_eq!(svc.list_results(FQN, None, None).await.unwrap(), vec![r]);
        let latest = svc.latest(FQN).await.unwrap().unwrap();
        assert_eq!((latest.timestamp, latest.status), (T0 + 1, TestCaseStatus::Failed));

        svc.delete_result(FQN, T0 + 1).await.unwrap();
        assert!(svc.latest(FQN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ingest_locks_are_released_after_use() {
        let svc = Arc::new(service().await);
        let mut tasks = Vec::new();
        for offset in 0..8 {
            let svc = Arc::clone(&svc);
            tasks.push(tokio::spawn(async move {
                svc.add_result(FQN, &req(offset, TestCaseStatus::Success)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(svc.lock_entries(), 0);
        assert_eq!(svc.list_results(FQN, None, None).await.unwrap().len(), 8);
    }
}
