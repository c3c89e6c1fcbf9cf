//! End-to-end propagation through the engine against the in-memory stores.
//!
//! Each test commits through [`SyncEngine`], drains the queue with `flush`
//! and then inspects the index documents directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use searchsync_core::route::Collection;
use searchsync_core::{
    CreateTestCaseResult, Document, EntityHeader, FieldChange, Script, Selector, TestCaseResult,
    TestCaseStatus,
};
use searchsync_engine::{
    EngineConfig, EntityRecord, Include, LineageRequest, MemoryPrimaryStore, PrimaryStore,
    PrimaryStoreError, ResultService, SyncEngine, SyncError,
};
use searchsync_index::{
    BulkOperation, ByQueryResponse, IndexDefinition, IndexError, MemoryBackend, SearchBackend,
    SearchPage, SearchRequest, TermsBucket, TermsRequest, WriteOutcome,
};

const SCHEMAS: &str = "database_schema_search_index";
const TABLES: &str = "table_search_index";
const CASES: &str = "test_case_search_index";

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

struct Harness {
    backend: Arc<MemoryBackend>,
    primary: Arc<MemoryPrimaryStore>,
    engine: Arc<SyncEngine>,
}

impl Harness {
    async fn indexed(&self, index: &str, id: &str) -> Document {
        self.engine.flush().await.unwrap();
        self.backend
            .get_document(index, id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{id} missing from {index}"))
    }

    async fn table(&self, id: &str) -> Document {
        self.indexed(TABLES, id).await
    }
}

/// Schema `sch-1` with three tables: `t-1` bare, `t-2` with an explicit
/// owner and domain, `t-3` in another schema.
async fn harness_with(backend: MemoryBackend) -> Harness {
    let backend = Arc::new(backend);
    let primary = Arc::new(MemoryPrimaryStore::new());
    let engine = SyncEngine::new(EngineConfig::default(), primary.clone(), backend.clone()).unwrap();
    engine.bootstrap().await.unwrap();

    engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("databaseSchema", "sch-1", "svc.db.sales"),
            doc(json!({"database": {"id": "db-1", "type": "database"}})),
        ))
        .await
        .unwrap();
    let tables = [
        ("t-1", "sch-1", json!({})),
        (
            "t-2",
            "sch-1",
            json!({
                "owners": [{"id": "u-9", "type": "user"}],
                "domain": {"id": "d-9", "type": "domain"},
            }),
        ),
        ("t-3", "sch-2", json!({})),
    ];
    for (id, schema, extra) in tables {
        let mut fields = doc(extra);
        fields.insert(
            "databaseSchema".into(),
            json!({"id": schema, "type": "databaseSchema"}),
        );
        engine
            .create_entity(EntityRecord::new(
                EntityHeader::new("table", id, &format!("svc.db.sales.{id}")),
                fields,
            ))
            .await
            .unwrap();
    }
    Harness {
        backend,
        primary,
        engine: Arc::new(engine),
    }
}

async fn harness() -> Harness {
    harness_with(MemoryBackend::new()).await
}

fn header(entity_type: &str, id: &str) -> EntityHeader {
    EntityHeader::new(entity_type, id, &format!("svc.db.sales.{id}"))
}

// ──────────────────────────────────────────────
// Inherited fields
// ──────────────────────────────────────────────

#[tokio::test]
async fn owner_propagates_to_children_without_explicit_owner() {
    let h = harness().await;
    h.engine
        .update_entity(
            "databaseSchema",
            "sch-1",
            &doc(json!({"owners": [{"id": "u-1", "type": "user"}]})),
        )
        .await
        .unwrap();

    let t1 = h.table("t-1").await;
    assert_eq!(t1["owners"][0]["id"], "u-1");
    assert_eq!(t1["owners"][0]["inherited"], true);

    let t2 = h.table("t-2").await;
    assert_eq!(t2["owners"], json!([{"id": "u-9", "type": "user"}]));

    let t3 = h.table("t-3").await;
    assert!(t3.get("owners").is_none());

    let schema = h.indexed(SCHEMAS, "sch-1").await;
    assert_eq!(schema["owners"][0]["id"], "u-1");
}

#[tokio::test]
async fn removing_owner_clears_only_inherited_copies() {
    let h = harness().await;
    let owners = doc(json!({"owners": [{"id": "u-1", "type": "user"}]}));
    h.engine
        .update_entity("databaseSchema", "sch-1", &owners)
        .await
        .unwrap();
    h.engine
        .update_entity("databaseSchema", "sch-1", &doc(json!({"owners": null})))
        .await
        .unwrap();

    assert_eq!(h.table("t-1").await["owners"], json!([]));
    assert_eq!(h.table("t-2").await["owners"][0]["id"], "u-9");
    assert!(h.indexed(SCHEMAS, "sch-1").await.get("owners").is_none());
}

#[tokio::test]
async fn removing_explicit_owner_leaves_child_list_unchanged() {
    let h = harness().await;
    // u-9 is set directly on t-2, so the schema losing u-9 must not touch it.
    h.engine
        .update_entity(
            "databaseSchema",
            "sch-1",
            &doc(json!({"owners": [{"id": "u-9", "type": "user"}]})),
        )
        .await
        .unwrap();
    h.engine
        .update_entity("databaseSchema", "sch-1", &doc(json!({"owners": []})))
        .await
        .unwrap();
    assert_eq!(h.table("t-2").await["owners"], json!([{"id": "u-9", "type": "user"}]));
}

#[tokio::test]
async fn domain_follows_schema_but_not_over_explicit_value() {
    let h = harness().await;
    let set = |id: &str| doc(json!({"domain": {"id": id, "type": "domain"}}));
    h.engine
        .update_entity("databaseSchema", "sch-1", &set("d-1"))
        .await
        .unwrap();
    assert_eq!(h.table("t-1").await["domain"]["id"], "d-1");
    assert_eq!(h.table("t-2").await["domain"]["id"], "d-9");

    h.engine
        .update_entity("databaseSchema", "sch-1", &set("d-2"))
        .await
        .unwrap();
    assert_eq!(h.table("t-1").await["domain"]["id"], "d-2");
    assert_eq!(h.table("t-1").await["domain"]["inherited"], true);

    h.engine
        .update_entity("databaseSchema", "sch-1", &doc(json!({"domain": null})))
        .await
        .unwrap();
    assert!(h.table("t-1").await.get("domain").is_none());
    assert_eq!(h.table("t-2").await["domain"]["id"], "d-9");
}

#[tokio::test]
async fn schema_tags_reach_tables_as_inherited() {
    let h = harness().await;
    h.engine
        .update_membership(
            "table",
            "t-2",
            Collection::Tags,
            vec![json!({"tagFQN": "Tier.Tier1"})],
            Vec::new(),
        )
        .await
        .unwrap();
    h.engine
        .update_membership(
            "databaseSchema",
            "sch-1",
            Collection::Tags,
            vec![json!({"tagFQN": "PII.Sensitive"}), json!({"tagFQN": "Tier.Tier1"})],
            Vec::new(),
        )
        .await
        .unwrap();

    let t2 = h.table("t-2").await;
    let keys: Vec<&str> = t2["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tagFQN"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["PII.Sensitive", "Tier.Tier1"]);
    // The explicit copy of Tier1 survives the merge.
    assert!(t2["tags"][1].get("inherited").is_none());

    h.engine
        .update_membership(
            "databaseSchema",
            "sch-1",
            Collection::Tags,
            Vec::new(),
            vec![json!({"tagFQN": "Tier.Tier1"})],
        )
        .await
        .unwrap();
    assert_eq!(h.table("t-2").await["tags"].as_array().unwrap().len(), 2);
    assert_eq!(h.table("t-1").await["tags"].as_array().unwrap().len(), 1);
}

// ──────────────────────────────────────────────
// Soft delete, hard delete
// ──────────────────────────────────────────────

#[tokio::test]
async fn soft_deleted_entity_visible_only_with_include_deleted() {
    let h = harness().await;
    h.engine.soft_delete_entity("table", "t-1").await.unwrap();
    h.engine.flush().await.unwrap();

    let search = h.engine.search();
    let live = search.list(&SearchRequest::new(TABLES)).await.unwrap();
    let ids: Vec<&str> = live.hits.iter().map(|hit| hit.id.as_str()).collect();
    assert!(!ids.contains(&"t-1"));

    let all = search
        .list(&SearchRequest::new(TABLES).include_deleted(true))
        .await
        .unwrap();
    let t1 = all.hits.iter().find(|hit| hit.id == "t-1").unwrap();
    assert_eq!(t1.source["deleted"], true);

    h.engine.restore_entity("table", "t-1").await.unwrap();
    assert_eq!(h.table("t-1").await["deleted"], false);
}

#[tokio::test]
async fn soft_deleting_schema_flags_its_tables() {
    let h = harness().await;
    h.engine
        .soft_delete_entity("databaseSchema", "sch-1")
        .await
        .unwrap();
    assert_eq!(h.table("t-1").await["deleted"], true);
    assert_eq!(h.table("t-2").await["deleted"], true);
    assert_eq!(h.table("t-3").await["deleted"], false);

    let err = h
        .engine
        .soft_delete_entity("databaseSchema", "sch-1")
        .await
        .unwrap_err();
    assert!(err.is_user_visible_not_found());
}

#[tokio::test]
async fn hard_delete_removes_children_and_lineage_references() {
    let h = harness().await;
    h.engine
        .add_lineage(&header("table", "t-1"), &header("table", "t-3"), Document::new())
        .await
        .unwrap();
    assert_eq!(h.table("t-3").await["lineage"].as_array().unwrap().len(), 1);

    h.engine.delete_entity("table", "t-1").await.unwrap();
    assert_eq!(h.table("t-3").await["lineage"], json!([]));

    h.engine.delete_entity("databaseSchema", "sch-1").await.unwrap();
    h.engine.flush().await.unwrap();
    for id in ["t-1", "t-2"] {
        assert!(h.backend.get_document(TABLES, id).await.unwrap().is_none());
    }
    assert!(h.backend.get_document(SCHEMAS, "sch-1").await.unwrap().is_none());
    assert!(h.backend.get_document(TABLES, "t-3").await.unwrap().is_some());
}

#[tokio::test]
async fn deleting_a_tag_strips_it_everywhere() {
    let h = harness().await;
    h.engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("tag", "tag-1", "PII.Sensitive"),
            Document::new(),
        ))
        .await
        .unwrap();
    for id in ["t-1", "t-3"] {
        h.engine
            .update_membership(
                "table",
                id,
                Collection::Tags,
                vec![json!({"tagFQN": "PII.Sensitive"}), json!({"tagFQN": "Tier.Tier2"})],
                Vec::new(),
            )
            .await
            .unwrap();
    }
    h.engine.delete_entity("tag", "tag-1").await.unwrap();

    for id in ["t-1", "t-3"] {
        assert_eq!(
            h.table(id).await["tags"],
            json!([{"tagFQN": "Tier.Tier2"}]),
            "{id}"
        );
    }
}

#[tokio::test]
async fn deleting_a_test_suite_strips_membership() {
    let h = harness().await;
    h.engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("testSuite", "ts-1", "svc.db.sales.t-1.testSuite"),
            Document::new(),
        ))
        .await
        .unwrap();
    h.engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("testCase", "tc-1", "svc.db.sales.t-1.rows"),
            doc(json!({"testSuite": {"id": "ts-1", "type": "testSuite"}})),
        ))
        .await
        .unwrap();
    let suite = json!({"id": "ts-1", "type": "testSuite", "fullyQualifiedName": "x"});
    h.engine
        .update_membership("testCase", "tc-1", Collection::TestSuites, vec![suite.clone()], Vec::new())
        .await
        .unwrap();
    // Re-adding is an upsert, not a duplicate.
    h.engine
        .update_membership("testCase", "tc-1", Collection::TestSuites, vec![suite], Vec::new())
        .await
        .unwrap();
    let case = h.indexed(CASES, "tc-1").await;
    assert_eq!(case["testSuites"].as_array().unwrap().len(), 1);

    h.engine.delete_entity("testSuite", "ts-1").await.unwrap();
    h.engine.flush().await.unwrap();
    // The suite's test cases are its children and go with it.
    assert!(h.backend.get_document(CASES, "tc-1").await.unwrap().is_none());
}

// ──────────────────────────────────────────────
// Lineage
// ──────────────────────────────────────────────

#[tokio::test]
async fn lineage_upsert_is_idempotent_and_removable() {
    let h = harness().await;
    let (a, b) = (header("table", "t-1"), header("table", "t-2"));
    for _ in 0..3 {
        h.engine
            .add_lineage(&a, &b, doc(json!({"pipeline": "etl"})))
            .await
            .unwrap();
    }
    let t1 = h.table("t-1").await;
    assert_eq!(t1["lineage"].as_array().unwrap().len(), 1);
    assert_eq!(t1["lineage"][0]["direction"], "downstream");
    assert_eq!(h.table("t-2").await["lineage"][0]["direction"], "upstream");

    let graph = h
        .engine
        .search()
        .lineage(&LineageRequest::new("svc.db.sales.t-2", 2, 0))
        .await
        .unwrap();
    assert_eq!(graph.node_ids(), vec!["t-1"]);

    h.engine.remove_lineage(&a, &b).await.unwrap();
    assert_eq!(h.table("t-1").await["lineage"], json!([]));
    assert_eq!(h.table("t-2").await["lineage"], json!([]));
}

#[tokio::test]
async fn lineage_cycle_keeps_both_edges_and_removes_one_direction() {
    let h = harness().await;
    let (a, b) = (header("table", "t-1"), header("table", "t-2"));
    h.engine.add_lineage(&a, &b, Document::new()).await.unwrap();
    h.engine.add_lineage(&b, &a, Document::new()).await.unwrap();

    let t1 = h.table("t-1").await;
    let mut directions: Vec<&str> = t1["lineage"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["direction"].as_str().unwrap())
        .collect();
    directions.sort();
    assert_eq!(directions, vec!["downstream", "upstream"]);

    let downstream = LineageRequest::new("svc.db.sales.t-1", 0, 1);
    let upstream = LineageRequest::new("svc.db.sales.t-1", 1, 0);
    let search = h.engine.search();
    assert_eq!(search.lineage(&downstream).await.unwrap().node_ids(), vec!["t-2"]);
    assert_eq!(search.lineage(&upstream).await.unwrap().node_ids(), vec!["t-2"]);

    h.engine.remove_lineage(&b, &a).await.unwrap();
    let t1 = h.table("t-1").await;
    assert_eq!(t1["lineage"].as_array().unwrap().len(), 1);
    assert_eq!(t1["lineage"][0]["direction"], "downstream");
    let t2 = h.table("t-2").await;
    assert_eq!(t2["lineage"].as_array().unwrap().len(), 1);
    assert_eq!(t2["lineage"][0]["direction"], "upstream");

    assert_eq!(search.lineage(&downstream).await.unwrap().node_ids(), vec!["t-2"]);
    assert!(search.lineage(&upstream).await.unwrap().node_ids().is_empty());
}

#[tokio::test]
async fn lineage_requires_live_endpoints() {
    let h = harness().await;
    h.engine.soft_delete_entity("table", "t-2").await.unwrap();
    let err = h
        .engine
        .add_lineage(&header("table", "t-1"), &header("table", "t-2"), Document::new())
        .await
        .unwrap_err();
    assert!(err.is_user_visible_not_found());
}

// ──────────────────────────────────────────────
// Failure policy
// ──────────────────────────────────────────────

#[tokio::test]
async fn primary_failure_aborts_before_the_index() {
    let h = harness().await;
    h.primary.set_failing(true);
    let err = h
        .engine
        .update_entity("table", "t-1", &doc(json!({"description": "new"})))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Primary(_)));
    h.primary.set_failing(false);

    assert!(h.table("t-1").await.get("description").is_none());
    assert_eq!(h.engine.queue_stats().operations, 0);
}

#[tokio::test]
async fn index_outage_never_fails_the_primary_write() {
    let h = harness().await;
    h.backend.set_available(false);
    h.engine
        .update_entity("table", "t-1", &doc(json!({"description": "while down"})))
        .await
        .unwrap();
    h.engine
        .create_entity(EntityRecord::new(header("table", "t-4"), Document::new()))
        .await
        .unwrap();
    h.engine.flush().await.unwrap();
    assert_eq!(h.engine.queue_stats().failed, 1);

    h.backend.set_available(true);
    let stored = h
        .engine
        .get_entity("table", "t-1", &["description"], Include::NonDeleted)
        .await
        .unwrap();
    assert_eq!(stored["description"], "while down");
    assert!(h.table("t-1").await.get("description").is_none());
    assert!(h.backend.get_document(TABLES, "t-4").await.unwrap().is_none());

    assert!(h.engine.search().get_document(TABLES, "t-1").await.is_ok());
    h.backend.set_available(false);
    let err = h.engine.search().get_document(TABLES, "t-1").await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn update_of_unindexed_document_is_a_noop() {
    let h = harness().await;
    h.backend.set_available(false);
    h.engine
        .create_entity(EntityRecord::new(header("table", "t-5"), Document::new()))
        .await
        .unwrap();
    h.backend.set_available(true);

    h.engine
        .update_entity("table", "t-5", &doc(json!({"description": "late"})))
        .await
        .unwrap();
    h.engine.flush().await.unwrap();
    let stats = h.engine.queue_stats();
    assert_eq!(stats.failed, 0);
    assert!(h.backend.get_document(TABLES, "t-5").await.unwrap().is_none());
}

/// Accepts index lifecycle calls and reads, but once stalled never finishes
/// a document write.
struct StalledBackend {
    inner: MemoryBackend,
    stalled: AtomicBool,
}

impl StalledBackend {
    async fn gate(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl SearchBackend for StalledBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        self.inner.index_exists(index).await
    }
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), IndexError> {
        self.inner.create_index(definition).await
    }
    async fn get_mapping(&self, index: &str) -> Result<Document, IndexError> {
        self.inner.get_mapping(index).await
    }
    async fn put_mapping(&self, index: &str, mapping: &Document) -> Result<(), IndexError> {
        self.inner.put_mapping(index, mapping).await
    }
    async fn delete_index(&self, index: &str) -> Result<(), IndexError> {
        self.inner.delete_index(index).await
    }
    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        self.inner.list_indexes().await
    }
    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        self.inner.put_alias(index, alias).await
    }
    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        self.inner.remove_alias(index, alias).await
    }
    async fn get_aliases(&self, index: &str) -> Result<Vec<String>, IndexError> {
        self.inner.get_aliases(index).await
    }
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, IndexError> {
        self.inner.get_document(index, id).await
    }
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: Document,
    ) -> Result<WriteOutcome, IndexError> {
        self.gate().await;
        self.inner.index_document(index, id, document).await
    }
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        script: &Script,
    ) -> Result<WriteOutcome, IndexError> {
        self.gate().await;
        self.inner.update_document(index, id, script).await
    }
    async fn update_by_query(
        &self,
        index: &str,
        selector: &Selector,
        script: &Script,
    ) -> Result<ByQueryResponse, IndexError> {
        self.gate().await;
        self.inner.update_by_query(index, selector, script).await
    }
    async fn delete_document(&self, index: &str, id: &str) -> Result<WriteOutcome, IndexError> {
        self.gate().await;
        self.inner.delete_document(index, id).await
    }
    async fn delete_by_query(
        &self,
        index: &str,
        selector: &Selector,
    ) -> Result<ByQueryResponse, IndexError> {
        self.gate().await;
        self.inner.delete_by_query(index, selector).await
    }
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, IndexError> {
        self.inner.search(request).await
    }
    async fn terms(&self, request: &TermsRequest) -> Result<Vec<TermsBucket>, IndexError> {
        self.inner.terms(request).await
    }
}

#[tokio::test]
async fn full_queue_drops_operations_instead_of_blocking_writes() {
    let backend = Arc::new(StalledBackend {
        inner: MemoryBackend::new(),
        stalled: AtomicBool::new(false),
    });
    let config = EngineConfig {
        queue_capacity: 1,
        ..EngineConfig::default()
    };
    let engine = SyncEngine::new(config, Arc::new(MemoryPrimaryStore::new()), backend.clone()).unwrap();
    engine.bootstrap().await.unwrap();
    engine
        .create_entity(EntityRecord::new(header("table", "t-1"), Document::new()))
        .await
        .unwrap();
    backend.stalled.store(true, Ordering::SeqCst);

    let writes = async {
        for n in 0..5 {
            engine
                .update_entity("table", "t-1", &doc(json!({"description": format!("v{n}")})))
                .await?;
        }
        Ok::<_, SyncError>(())
    };
    tokio::time::timeout(Duration::from_millis(500), writes)
        .await
        .expect("writes waited on a stalled index")
        .unwrap();

    assert!(engine.queue_stats().dropped >= 3);
    let stored = engine
        .get_entity("table", "t-1", &["description"], Include::NonDeleted)
        .await
        .unwrap();
    assert_eq!(stored["description"], "v4");
}

// ──────────────────────────────────────────────
// Results and direct writes
// ──────────────────────────────────────────────

#[tokio::test]
async fn earlier_result_does_not_override_later_status() {
    let h = harness().await;
    let fqn = "svc.db.sales.t-1.row_count";
    h.engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("testCase", "tc-9", fqn),
            doc(json!({"entityFQN": "svc.db.sales.t-1"})),
        ))
        .await
        .unwrap();
    let results = ResultService::new(Arc::clone(&h.engine));
    let base = 1_700_000_000_000;
    results
        .add_result(fqn, &CreateTestCaseResult::new(base + 100, TestCaseStatus::Success))
        .await
        .unwrap();
    results
        .add_result(fqn, &CreateTestCaseResult::new(base + 90, TestCaseStatus::Failed))
        .await
        .unwrap();

    let case = h.indexed(CASES, "tc-9").await;
    assert_eq!(case["testCaseStatus"], "Success");
    assert_eq!(case["testCaseResult"]["timestamp"], base + 100);
    assert!(!h
        .engine
        .search()
        .has_test_case_failure("svc.db.sales.t-1")
        .await
        .unwrap());

    results.delete_result(fqn, base + 100).await.unwrap();
    let case = h.indexed(CASES, "tc-9").await;
    assert_eq!(case["testCaseStatus"], "Failed");
    assert!(h
        .engine
        .search()
        .has_test_case_failure("svc.db.sales.t-1")
        .await
        .unwrap());
}

/// Delegates to the in-memory store but can refuse result appends.
struct RefusingHistory {
    inner: MemoryPrimaryStore,
    refuse_appends: AtomicBool,
}

#[async_trait]
impl PrimaryStore for RefusingHistory {
    async fn create_entity(&self, record: EntityRecord) -> Result<EntityRecord, PrimaryStoreError> {
        self.inner.create_entity(record).await
    }
    async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.inner.get_entity(entity_type, id, include).await
    }
    async fn get_entity_by_name(
        &self,
        entity_type: &str,
        fqn: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.inner.get_entity_by_name(entity_type, fqn, include).await
    }
    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        patch: &Document,
    ) -> Result<(EntityRecord, Vec<FieldChange>), PrimaryStoreError> {
        self.inner.update_entity(entity_type, id, patch).await
    }
    async fn set_deleted(
        &self,
        entity_type: &str,
        id: &str,
        deleted: bool,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.inner.set_deleted(entity_type, id, deleted).await
    }
    async fn delete_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.inner.delete_entity(entity_type, id).await
    }
    async fn append_result(&self, result: TestCaseResult) -> Result<(), PrimaryStoreError> {
        if self.refuse_appends.load(Ordering::SeqCst) {
            return Err(PrimaryStoreError::Backend("history unavailable".into()));
        }
        self.inner.append_result(result).await
    }
    async fn results_in_range(
        &self,
        test_case_fqn: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TestCaseResult>, PrimaryStoreError> {
        self.inner.results_in_range(test_case_fqn, start, end).await
    }
    async fn result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<Option<TestCaseResult>, PrimaryStoreError> {
        self.inner.result_at(test_case_fqn, timestamp).await
    }
    async fn delete_result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<TestCaseResult, PrimaryStoreError> {
        self.inner.delete_result_at(test_case_fqn, timestamp).await
    }
    async fn current_incident(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<String>, PrimaryStoreError> {
        self.inner.current_incident(test_case_fqn).await
    }
    async fn open_incident(&self, test_case_fqn: &str) -> Result<String, PrimaryStoreError> {
        self.inner.open_incident(test_case_fqn).await
    }
    async fn resolve_incident(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<String>, PrimaryStoreError> {
        self.inner.resolve_incident(test_case_fqn).await
    }
    async fn put_failed_rows_sample(
        &self,
        test_case_fqn: &str,
        sample: Value,
    ) -> Result<(), PrimaryStoreError> {
        self.inner.put_failed_rows_sample(test_case_fqn, sample).await
    }
    async fn failed_rows_sample(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<Value>, PrimaryStoreError> {
        self.inner.failed_rows_sample(test_case_fqn).await
    }
    async fn delete_failed_rows_sample(
        &self,
        test_case_fqn: &str,
    ) -> Result<bool, PrimaryStoreError> {
        self.inner.delete_failed_rows_sample(test_case_fqn).await
    }
}

#[tokio::test]
async fn result_rollup_survives_a_closed_queue() {
    let h = harness().await;
    let fqn = "svc.db.sales.t-1.not_null";
    h.engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("testCase", "tc-7", fqn),
            doc(json!({"entityFQN": "svc.db.sales.t-1"})),
        ))
        .await
        .unwrap();
    let results = ResultService::new(Arc::clone(&h.engine));
    h.engine.shutdown().await;

    let base = 1_700_000_000_000;
    let added = results
        .add_result(fqn, &CreateTestCaseResult::new(base, TestCaseStatus::Failed))
        .await
        .unwrap();
    assert_eq!(results.list_results(fqn, None, None).await.unwrap(), vec![added]);
    let latest = results.latest(fqn).await.unwrap().unwrap();
    assert_eq!((latest.timestamp, latest.status), (base, TestCaseStatus::Failed));
    let stored = h
        .engine
        .get_entity("testCase", "tc-7", &["testCaseStatus"], Include::NonDeleted)
        .await
        .unwrap();
    assert_eq!(stored["testCaseStatus"], "Failed");
}

#[tokio::test]
async fn refused_append_leaves_no_incident_or_pointer() {
    let primary = Arc::new(RefusingHistory {
        inner: MemoryPrimaryStore::new(),
        refuse_appends: AtomicBool::new(false),
    });
    let engine = SyncEngine::new(
        EngineConfig::default(),
        primary.clone(),
        Arc::new(MemoryBackend::new()),
    )
    .unwrap();
    engine.bootstrap().await.unwrap();
    let fqn = "svc.db.sales.t-1.unique";
    engine
        .create_entity(EntityRecord::new(
            EntityHeader::new("testCase", "tc-8", fqn),
            Document::new(),
        ))
        .await
        .unwrap();
    let results = ResultService::new(Arc::new(engine));
    let base = 1_700_000_000_000;

    primary.refuse_appends.store(true, Ordering::SeqCst);
    let err = results
        .add_result(fqn, &CreateTestCaseResult::new(base, TestCaseStatus::Failed))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Primary(_)));
    assert_eq!(primary.current_incident(fqn).await.unwrap(), None);
    assert!(results.latest(fqn).await.unwrap().is_none());
    assert!(results.list_results(fqn, None, None).await.unwrap().is_empty());

    primary.refuse_appends.store(false, Ordering::SeqCst);
    let first = results
        .add_result(fqn, &CreateTestCaseResult::new(base + 1, TestCaseStatus::Failed))
        .await
        .unwrap();
    assert_eq!(primary.current_incident(fqn).await.unwrap(), first.incident_id);

    primary.refuse_appends.store(true, Ordering::SeqCst);
    results
        .add_result(fqn, &CreateTestCaseResult::new(base + 2, TestCaseStatus::Failed))
        .await
        .unwrap_err();
    assert_eq!(primary.current_incident(fqn).await.unwrap(), first.incident_id);
}

#[tokio::test]
async fn bulk_write_falls_back_when_backend_declines() {
    let h = harness_with(MemoryBackend::without_bulk()).await;
    let ops = vec![
        BulkOperation::Index {
            index: TABLES.into(),
            id: "b-1".into(),
            document: doc(json!({"id": "b-1", "fullyQualifiedName": "bulk.b-1"})),
        },
        BulkOperation::Delete {
            index: TABLES.into(),
            id: "t-3".into(),
        },
        BulkOperation::Delete {
            index: "no_such_index".into(),
            id: "x".into(),
        },
    ];
    let response = h.engine.bulk_write(ops).await.unwrap();
    assert_eq!(response.items.len(), 3);
    assert_eq!(response.failed(), 1);
    assert!(h.backend.get_document(TABLES, "b-1").await.unwrap().is_some());
    assert!(h.backend.get_document(TABLES, "t-3").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_by_field_and_prefix() {
    let h = harness().await;
    let removed = h
        .engine
        .delete_by_field(TABLES, "databaseSchema.id", "sch-2")
        .await
        .unwrap();
    assert_eq!(removed.changed, 1);

    let removed = h
        .engine
        .delete_by_prefix(TABLES, "svc.db.sales.t-")
        .await
        .unwrap();
    assert_eq!(removed.changed, 2);
    assert!(!h.engine.delete_by_id(TABLES, "t-1").await.unwrap());

    let left = h
        .engine
        .delete_by_query(SCHEMAS, &Selector::All)
        .await
        .unwrap();
    assert_eq!(left.changed, 1);
}
