//! The synchronization engine: primary write first, then index propagation.
//!
//! Every mutating call commits to the primary store, routes the resulting
//! [`Change`] and enqueues the targets as one operation. Primary failures
//! abort the call; index failures never roll the primary write back.

use std::sync::Arc;

use serde_json::Value;

use searchsync_core::document::{TAGS_FIELD, TEST_SUITES_FIELD};
use searchsync_core::route::Collection;
use searchsync_core::{
    Change, Document, EntityHeader, PropagationTarget, Router, Selector, TagLabel,
};
use searchsync_index::{
    BulkItemResult, BulkOperation, BulkResponse, ByQueryResponse, IndexError, SearchBackend,
    WriteOutcome,
};

use crate::admin::IndexAdmin;
use crate::apply::{apply_bulk_item, apply_target};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::executor::{Operation, QueueStats, SyncQueue};
use crate::primary::{EntityRecord, Include, PrimaryStore};
use crate::read::SearchService;

pub struct SyncEngine {
    config: EngineConfig,
    router: Router,
    primary: Arc<dyn PrimaryStore>,
    backend: Arc<dyn SearchBackend>,
    admin: IndexAdmin,
    queue: SyncQueue,
}

impl SyncEngine {
    /// Validate the configuration and start the propagation worker.
    /// Must be called within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        primary: Arc<dyn PrimaryStore>,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let router = Router::new(config.routing_table());
        let queue = SyncQueue::start(Arc::clone(&backend), config.queue_capacity);
        Ok(SyncEngine {
            admin: IndexAdmin::new(Arc::clone(&backend)),
            config,
            router,
            primary,
            backend,
            queue,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn admin(&self) -> &IndexAdmin {
        &self.admin
    }

    pub fn primary(&self) -> &dyn PrimaryStore {
        self.primary.as_ref()
    }

    pub fn backend(&self) -> Arc<dyn SearchBackend> {
        Arc::clone(&self.backend)
    }

    /// A read-path handle over the same backend and routing table.
    pub fn search(&self) -> SearchService {
        SearchService::new(Arc::clone(&self.backend), self.router.table().clone())
    }

    pub fn index_for(&self, entity_type: &str) -> Result<&str, SyncError> {
        Ok(self.router.table().index_for(entity_type)?)
    }

    /// Create every configured index and its aliases, skipping those that
    /// already exist.
    pub async fn bootstrap(&self) -> Result<(), SyncError> {
        for mapping in &self.config.indexes {
            let def = mapping.definition(&self.config.global_alias);
            self.admin.create_index(&def).await?;
        }
        tracing::info!(indexes = self.config.indexes.len(), "index catalogue ready");
        Ok(())
    }

    // ── Propagation ──────────────────────────────────────────────────────────

    /// Route a committed change and enqueue its targets as one operation,
    /// without waiting for queue room. Returns the number of targets
    /// enqueued; a full queue drops the operation and returns 0.
    pub async fn propagate(&self, change: &Change) -> Result<usize, SyncError> {
        let targets = self.router.route(change)?;
        let label = format!("{} {}", change.kind(), change.subject());
        self.enqueue(label, targets).await
    }

    /// Enqueue already-routed targets without waiting. Returns the number
    /// of targets enqueued.
    pub async fn enqueue(
        &self,
        label: impl Into<String>,
        targets: Vec<PropagationTarget>,
    ) -> Result<usize, SyncError> {
        let label = label.into();
        let count = targets.len();
        match self.queue.try_submit(Operation::new(label.clone(), targets)) {
            Ok(()) => Ok(count),
            Err(SyncError::QueueFull) => {
                tracing::warn!(label = %label, targets = count, "propagation queue full, dropping operation");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Propagate a change whose primary write already committed. Failures
    /// are logged; the committed write stands.
    async fn propagate_committed(&self, change: &Change) {
        if let Err(e) = self.propagate(change).await {
            tracing::warn!(
                change = change.kind(),
                entity = %change.subject(),
                error = %e,
                "committed change not propagated"
            );
        }
    }

    /// Route and apply immediately, stopping at the first index failure.
    pub async fn apply_now(&self, change: &Change) -> Result<usize, SyncError> {
        let targets = self.router.route(change)?;
        for target in &targets {
            apply_target(self.backend.as_ref(), target).await?;
        }
        Ok(targets.len())
    }

    pub async fn flush(&self) -> Result<(), SyncError> {
        self.queue.flush().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    // ── Entity lifecycle ─────────────────────────────────────────────────────

    /// Create the entity and write its own document synchronously so the
    /// creation response is searchable. An index failure is logged; the
    /// primary write still stands.
    pub async fn create_entity(&self, record: EntityRecord) -> Result<EntityRecord, SyncError> {
        self.index_for(&record.header.entity_type)?;
        let record = self.primary.create_entity(record).await?;
        let change = Change::EntityCreated {
            entity: record.header.clone(),
            document: record.to_document(),
        };
        if let Err(e) = self.apply_now(&change).await {
            tracing::warn!(entity = %record.header, error = %e, "created entity not indexed");
        }
        Ok(record)
    }

    /// Field-selected lookup through the primary store.
    pub async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
        fields: &[&str],
        include: Include,
    ) -> Result<Document, SyncError> {
        let record = self.primary.get_entity(entity_type, id, include).await?;
        Ok(record.select(fields))
    }

    /// Patch an entity's fields (null removes) and propagate the diff.
    pub async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        patch: &Document,
    ) -> Result<EntityRecord, SyncError> {
        let (record, changes) = self.primary.update_entity(entity_type, id, patch).await?;
        if !changes.is_empty() {
            self.propagate_committed(&Change::EntityUpdated {
                entity: record.header.clone(),
                changes,
            })
            .await;
        }
        Ok(record)
    }

    pub async fn soft_delete_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, SyncError> {
        self.primary.get_entity(entity_type, id, Include::NonDeleted).await?;
        let record = self.primary.set_deleted(entity_type, id, true).await?;
        self.propagate_committed(&Change::EntitySoftDeleted {
            entity: record.header.clone(),
        })
        .await;
        Ok(record)
    }

    pub async fn restore_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, SyncError> {
        self.primary.get_entity(entity_type, id, Include::Deleted).await?;
        let record = self.primary.set_deleted(entity_type, id, false).await?;
        self.propagate_committed(&Change::EntityRestored {
            entity: record.header.clone(),
        })
        .await;
        Ok(record)
    }

    /// Permanent delete, cascading to child documents and embedded references.
    pub async fn delete_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, SyncError> {
        let record = self.primary.delete_entity(entity_type, id).await?;
        self.propagate_committed(&Change::EntityDeleted {
            entity: record.header.clone(),
        })
        .await;
        Ok(record)
    }

    /// Add and remove tags or test suites on an entity.
    pub async fn update_membership(
        &self,
        entity_type: &str,
        id: &str,
        collection: Collection,
        added: Vec<Value>,
        removed: Vec<Value>,
    ) -> Result<EntityRecord, SyncError> {
        let record = self.primary.get_entity(entity_type, id, Include::NonDeleted).await?;
        let (field, key_field) = match collection {
            Collection::Tags => (TAGS_FIELD, "tagFQN"),
            Collection::TestSuites => (TEST_SUITES_FIELD, "id"),
        };
        let key = |v: &Value| v.get(key_field).and_then(Value::as_str).map(str::to_string);
        let gone: Vec<String> = removed.iter().filter_map(key).collect();
        let mut members: Vec<Value> = record
            .fields
            .get(field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        members.retain(|m| key(m).is_none_or(|k| !gone.contains(&k)));
        for entry in &added {
            let k = key(entry);
            members.retain(|m| k.is_none() || key(m) != k);
            members.push(entry.clone());
        }
        if collection == Collection::Tags {
            let mut tags: Vec<TagLabel> = members.iter().filter_map(TagLabel::from_value).collect();
            tags.sort_by(|a, b| a.tag_fqn.cmp(&b.tag_fqn));
            members = tags.iter().map(TagLabel::to_value).collect();
        }

        let mut patch = Document::new();
        patch.insert(field.to_string(), Value::Array(members));
        let (record, _) = self.primary.update_entity(entity_type, id, &patch).await?;
        self.propagate_committed(&Change::MembershipChanged {
            entity: record.header.clone(),
            collection,
            added,
            removed,
        })
        .await;
        Ok(record)
    }

    // ── Lineage ──────────────────────────────────────────────────────────────

    pub async fn add_lineage(
        &self,
        from: &EntityHeader,
        to: &EntityHeader,
        details: Document,
    ) -> Result<(), SyncError> {
        self.require_live(from).await?;
        self.require_live(to).await?;
        self.propagate(&Change::LineageAdded {
            from: from.clone(),
            to: to.clone(),
            details,
        })
        .await?;
        Ok(())
    }

    pub async fn remove_lineage(
        &self,
        from: &EntityHeader,
        to: &EntityHeader,
    ) -> Result<(), SyncError> {
        self.propagate(&Change::LineageRemoved {
            from: from.clone(),
            to: to.clone(),
        })
        .await?;
        Ok(())
    }

    async fn require_live(&self, entity: &EntityHeader) -> Result<(), SyncError> {
        self.primary
            .get_entity(&entity.entity_type, &entity.id, Include::NonDeleted)
            .await?;
        Ok(())
    }

    // ── Direct index writes ──────────────────────────────────────────────────

    /// Bulk write, falling back to one-by-one when the backend declines bulk.
    pub async fn bulk_write(&self, ops: Vec<BulkOperation>) -> Result<BulkResponse, SyncError> {
        match self.backend.bulk(ops.clone()).await {
            Err(IndexError::NotImplemented { .. }) => {}
            other => return Ok(other?),
        }
        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            let (outcome, error) = match apply_bulk_item(self.backend.as_ref(), &op).await {
                Ok(outcome) => (Some(outcome), None),
                Err(e) => (None, Some(e.to_string())),
            };
            items.push(BulkItemResult {
                index: op.index_name().to_string(),
                id: op.doc_id().to_string(),
                outcome,
                error,
            });
        }
        Ok(BulkResponse { items })
    }

    pub async fn delete_by_id(&self, index: &str, id: &str) -> Result<bool, SyncError> {
        let outcome = self.backend.delete_document(index, id).await?;
        Ok(outcome == WriteOutcome::Deleted)
    }

    pub async fn delete_by_query(
        &self,
        index: &str,
        selector: &Selector,
    ) -> Result<ByQueryResponse, SyncError> {
        Ok(self.backend.delete_by_query(index, selector).await?)
    }

    pub async fn delete_by_field(
        &self,
        index: &str,
        field: &str,
        value: &str,
    ) -> Result<ByQueryResponse, SyncError> {
        self.delete_by_query(index, &Selector::field(field, value))
            .await
    }

    pub async fn delete_by_prefix(
        &self,
        index: &str,
        fqn_prefix: &str,
    ) -> Result<ByQueryResponse, SyncError> {
        self.delete_by_query(index, &Selector::fqn_prefix(fqn_prefix))
            .await
    }
}
