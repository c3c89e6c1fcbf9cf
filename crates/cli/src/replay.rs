//! Replaying a scripted change log against an in-memory engine.
//!
//! A replay file is a JSON array of steps. Write steps go through the
//! engine exactly as an API caller would; read steps flush the propagation
//! queue first and record what the index returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use searchsync_core::route::Collection;
use searchsync_core::{CreateTestCaseResult, Document, EntityHeader, Selector, TestCaseResultPatch};
use searchsync_engine::{
    EntityRecord, EngineConfig, Include, LineageRequest, MemoryPrimaryStore, QueueStats,
    ResultService, SearchService, SyncEngine, SyncError,
};
use searchsync_index::{MemoryBackend, SearchRequest};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub(crate) enum ReplayStep {
    // ── Writes ───────────────────────────────────────────────────────────
    CreateEntity {
        entity_type: String,
        id: String,
        fqn: String,
        #[serde(default)]
        fields: Document,
    },
    UpdateEntity {
        entity_type: String,
        id: String,
        patch: Document,
    },
    SoftDelete {
        entity_type: String,
        id: String,
    },
    Restore {
        entity_type: String,
        id: String,
    },
    Delete {
        entity_type: String,
        id: String,
    },
    AddLineage {
        from: EntityHeader,
        to: EntityHeader,
        #[serde(default)]
        details: Document,
    },
    RemoveLineage {
        from: EntityHeader,
        to: EntityHeader,
    },
    Membership {
        entity_type: String,
        id: String,
        collection: Collection,
        #[serde(default)]
        added: Vec<Value>,
        #[serde(default)]
        removed: Vec<Value>,
    },
    AddResult {
        test_case_fqn: String,
        result: CreateTestCaseResult,
    },
    UpdateResult {
        test_case_fqn: String,
        timestamp: i64,
        patch: TestCaseResultPatch,
    },
    DeleteResult {
        test_case_fqn: String,
        timestamp: i64,
    },
    DeleteByField {
        index: String,
        field: String,
        value: String,
    },
    Flush,

    // ── Reads ────────────────────────────────────────────────────────────
    /// Primary-store lookup; no `fields` returns the whole entity.
    Get {
        entity_type: String,
        id: String,
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default)]
        include_deleted: bool,
    },
    List {
        request: SearchRequest,
    },
    Document {
        index: String,
        id: String,
    },
    Lineage {
        request: LineageRequest,
    },
    DataQualityLineage {
        fqn: String,
        #[serde(default)]
        upstream_depth: usize,
        #[serde(default)]
        filters: Vec<Selector>,
        #[serde(default)]
        include_deleted: bool,
    },
    Aggregate {
        index: String,
        field: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        query: Option<String>,
        #[serde(default = "default_buckets")]
        size: usize,
    },
    Results {
        test_case_fqn: String,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        end: Option<i64>,
    },
}

fn default_buckets() -> usize {
    10
}

impl ReplayStep {
    fn name(&self) -> &'static str {
        match self {
            ReplayStep::CreateEntity { .. } => "createEntity",
            ReplayStep::UpdateEntity { .. } => "updateEntity",
            ReplayStep::SoftDelete { .. } => "softDelete",
            ReplayStep::Restore { .. } => "restore",
            ReplayStep::Delete { .. } => "delete",
            ReplayStep::AddLineage { .. } => "addLineage",
            ReplayStep::RemoveLineage { .. } => "removeLineage",
            ReplayStep::Membership { .. } => "membership",
            ReplayStep::AddResult { .. } => "addResult",
            ReplayStep::UpdateResult { .. } => "updateResult",
            ReplayStep::DeleteResult { .. } => "deleteResult",
            ReplayStep::DeleteByField { .. } => "deleteByField",
            ReplayStep::Flush => "flush",
            ReplayStep::Get { .. } => "get",
            ReplayStep::List { .. } => "list",
            ReplayStep::Document { .. } => "document",
            ReplayStep::Lineage { .. } => "lineage",
            ReplayStep::DataQualityLineage { .. } => "dataQualityLineage",
            ReplayStep::Aggregate { .. } => "aggregate",
            ReplayStep::Results { .. } => "results",
        }
    }

    /// Steps that read the index observe every earlier write.
    fn reads_index(&self) -> bool {
        matches!(
            self,
            ReplayStep::List { .. }
                | ReplayStep::Document { .. }
                | ReplayStep::Lineage { .. }
                | ReplayStep::DataQualityLineage { .. }
                | ReplayStep::Aggregate { .. }
        )
    }
}

/// What one read step returned.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StepOutput {
    pub step: usize,
    pub kind: &'static str,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplayReport {
    pub steps: usize,
    pub outputs: Vec<StepOutput>,
    pub queue: QueueStats,
}

pub(crate) fn parse_steps(content: &str) -> Result<Vec<ReplayStep>, serde_json::Error> {
    serde_json::from_str(content)
}

/// Run `steps` in order against a fresh in-memory primary store and index.
/// Stops at the first failing step.
pub(crate) async fn replay(
    config: EngineConfig,
    steps: Vec<ReplayStep>,
) -> Result<ReplayReport, String> {
    let engine = SyncEngine::new(
        config,
        Arc::new(MemoryPrimaryStore::new()),
        Arc::new(MemoryBackend::new()),
    )
    .map_err(|e| e.to_string())?;
    let engine = Arc::new(engine);
    engine
        .bootstrap()
        .await
        .map_err(|e| format!("bootstrap failed: {}", e))?;

    let results = ResultService::new(Arc::clone(&engine));
    let search = engine.search();
    let total = steps.len();
    let mut outputs = Vec::new();

    for (i, step) in steps.into_iter().enumerate() {
        let n = i + 1;
        let kind = step.name();
        tracing::debug!(step = n, kind, "replaying");
        let outcome = run_step(&engine, &results, &search, step).await;
        match outcome {
            Ok(Some(value)) => outputs.push(StepOutput {
                step: n,
                kind,
                value,
            }),
            Ok(None) => {}
            Err(e) => {
                engine.shutdown().await;
                return Err(format!("step {} ({}) failed: {}", n, kind, e));
            }
        }
    }

    engine.flush().await.map_err(|e| e.to_string())?;
    let queue = engine.queue_stats();
    engine.shutdown().await;
    tracing::info!(
        steps = total,
        applied = queue.applied,
        failed = queue.failed,
        "replay finished"
    );
    Ok(ReplayReport {
        steps: total,
        outputs,
        queue,
    })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

async fn run_step(
    engine: &SyncEngine,
    results: &ResultService,
    search: &SearchService,
    step: ReplayStep,
) -> Result<Option<Value>, SyncError> {
    if step.reads_index() {
        engine.flush().await?;
    }
    match step {
        ReplayStep::CreateEntity {
            entity_type,
            id,
            fqn,
            fields,
        } => {
            let header = EntityHeader::new(&entity_type, &id, &fqn);
            engine
                .create_entity(EntityRecord::new(header, fields))
                .await?;
        }
        ReplayStep::UpdateEntity {
            entity_type,
            id,
            patch,
        } => {
            engine.update_entity(&entity_type, &id, &patch).await?;
        }
        ReplayStep::SoftDelete { entity_type, id } => {
            engine.soft_delete_entity(&entity_type, &id).await?;
        }
        ReplayStep::Restore { entity_type, id } => {
            engine.restore_entity(&entity_type, &id).await?;
        }
        ReplayStep::Delete { entity_type, id } => {
            engine.delete_entity(&entity_type, &id).await?;
        }
        ReplayStep::AddLineage { from, to, details } => {
            engine.add_lineage(&from, &to, details).await?;
        }
        ReplayStep::RemoveLineage { from, to } => {
            engine.remove_lineage(&from, &to).await?;
        }
        ReplayStep::Membership {
            entity_type,
            id,
            collection,
            added,
            removed,
        } => {
            engine
                .update_membership(&entity_type, &id, collection, added, removed)
                .await?;
        }
        ReplayStep::AddResult {
            test_case_fqn,
            result,
        } => {
            results.add_result(&test_case_fqn, &result).await?;
        }
        ReplayStep::UpdateResult {
            test_case_fqn,
            timestamp,
            patch,
        } => {
            results
                .update_result(&test_case_fqn, timestamp, &patch)
                .await?;
        }
        ReplayStep::DeleteResult {
            test_case_fqn,
            timestamp,
        } => {
            results.delete_result(&test_case_fqn, timestamp).await?;
        }
        ReplayStep::DeleteByField {
            index,
            field,
            value,
        } => {
            engine.flush().await?;
            let res = engine.delete_by_field(&index, &field, &value).await?;
            return Ok(Some(to_json(&res)));
        }
        ReplayStep::Flush => {
            engine.flush().await?;
        }
        ReplayStep::Get {
            entity_type,
            id,
            fields,
            include_deleted,
        } => {
            let include = if include_deleted {
                Include::All
            } else {
                Include::NonDeleted
            };
            let doc = if fields.is_empty() {
                engine
                    .primary()
                    .get_entity(&entity_type, &id, include)
                    .await?
                    .to_document()
            } else {
                let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                engine.get_entity(&entity_type, &id, &fields, include).await?
            };
            return Ok(Some(Value::Object(doc)));
        }
        ReplayStep::List { request } => {
            return Ok(Some(to_json(&search.list(&request).await?)));
        }
        ReplayStep::Document { index, id } => {
            return Ok(Some(Value::Object(search.get_document(&index, &id).await?)));
        }
        ReplayStep::Lineage { request } => {
            return Ok(Some(to_json(&search.lineage(&request).await?)));
        }
        ReplayStep::DataQualityLineage {
            fqn,
            upstream_depth,
            filters,
            include_deleted,
        } => {
            let graph = search
                .data_quality_lineage(&fqn, upstream_depth, filters, include_deleted)
                .await?;
            return Ok(Some(to_json(&graph)));
        }
        ReplayStep::Aggregate {
            index,
            field,
            value,
            query,
            size,
        } => {
            let buckets = search
                .aggregate(&index, &field, &value, query.as_deref(), size)
                .await?;
            return Ok(Some(to_json(&buckets)));
        }
        ReplayStep::Results {
            test_case_fqn,
            start,
            end,
        } => {
            let history = results.list_results(&test_case_fqn, start, end).await?;
            return Ok(Some(to_json(&history)));
        }
    }
    Ok(None)
}
