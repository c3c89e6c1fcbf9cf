//! The primary record store as the engine consumes it.
//!
//! Entity CRUD and versioning belong to the store; the engine only needs
//! lookups with a soft-delete visibility filter, updates that report a
//! per-field before/after diff, and the time-series history of test case
//! results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use searchsync_core::document::{DELETED_FIELD, ENTITY_TYPE_FIELD, FQN_FIELD, ID_FIELD};
use searchsync_core::{Document, EntityHeader, FieldChange, TestCaseResult};

use crate::error::PrimaryStoreError;

/// Soft-delete visibility for lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Include {
    #[default]
    NonDeleted,
    Deleted,
    All,
}

impl Include {
    pub fn admits(self, deleted: bool) -> bool {
        match self {
            Include::NonDeleted => !deleted,
            Include::Deleted => deleted,
            Include::All => true,
        }
    }
}

/// An entity as stored in the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub header: EntityHeader,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub fields: Document,
}

impl EntityRecord {
    pub fn new(header: EntityHeader, fields: Document) -> Self {
        EntityRecord {
            header,
            deleted: false,
            fields,
        }
    }

    /// The searchable projection written to the index.
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(ID_FIELD.into(), Value::String(self.header.id.clone()));
        doc.insert(FQN_FIELD.into(), Value::String(self.header.fqn.clone()));
        doc.insert(
            ENTITY_TYPE_FIELD.into(),
            Value::String(self.header.entity_type.clone()),
        );
        doc.insert(DELETED_FIELD.into(), Value::Bool(self.deleted));
        doc
    }

    /// Only the requested fields (identity is always kept).
    pub fn select(&self, fields: &[&str]) -> Document {
        let mut doc = self.to_document();
        doc.retain(|k, _| {
            fields.contains(&k.as_str())
                || [ID_FIELD, FQN_FIELD, ENTITY_TYPE_FIELD, DELETED_FIELD].contains(&k.as_str())
        });
        doc
    }
}

/// Patch `fields` in place and report what changed. A null in the patch
/// removes the field.
pub fn diff_and_apply(fields: &mut Document, patch: &Document) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for (name, next) in patch {
        let prev = fields.get(name).cloned();
        if next.is_null() {
            if let Some(prev) = prev {
                fields.remove(name);
                changes.push(FieldChange::new(name, Some(prev), None));
            }
        } else if prev.as_ref() != Some(next) {
            fields.insert(name.clone(), next.clone());
            changes.push(FieldChange::new(name, prev, Some(next.clone())));
        }
    }
    changes
}

#[async_trait]
pub trait PrimaryStore: Send + Sync + 'static {
    // ── Entities ─────────────────────────────────────────────────────────────

    async fn create_entity(&self, record: EntityRecord) -> Result<EntityRecord, PrimaryStoreError>;

    async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError>;

    async fn get_entity_by_name(
        &self,
        entity_type: &str,
        fqn: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError>;

    /// Apply a field patch to a live entity, returning the new record and the
    /// fields that actually changed.
    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        patch: &Document,
    ) -> Result<(EntityRecord, Vec<FieldChange>), PrimaryStoreError>;

    async fn set_deleted(
        &self,
        entity_type: &str,
        id: &str,
        deleted: bool,
    ) -> Result<EntityRecord, PrimaryStoreError>;

    /// Permanently remove an entity.
    async fn delete_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, PrimaryStoreError>;

    // ── Time series ──────────────────────────────────────────────────────────

    async fn append_result(&self, result: TestCaseResult) -> Result<(), PrimaryStoreError>;

    /// Results with `start <= timestamp <= end`, in insertion order.
    async fn results_in_range(
        &self,
        test_case_fqn: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TestCaseResult>, PrimaryStoreError>;

    async fn result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<Option<TestCaseResult>, PrimaryStoreError>;

    /// Remove the record stored at `timestamp`. `ResultNotFound` if none.
    async fn delete_result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<TestCaseResult, PrimaryStoreError>;

    // ── Incidents and failed rows ────────────────────────────────────────────

    /// The open incident for a test case, if any.
    async fn current_incident(&self, test_case_fqn: &str)
        -> Result<Option<String>, PrimaryStoreError>;

    /// The open incident for a test case, opening one if there is none.
    async fn open_incident(&self, test_case_fqn: &str) -> Result<String, PrimaryStoreError>;

    /// Close the open incident, if any, returning its id.
    async fn resolve_incident(&self, test_case_fqn: &str)
        -> Result<Option<String>, PrimaryStoreError>;

    async fn put_failed_rows_sample(
        &self,
        test_case_fqn: &str,
        sample: Value,
    ) -> Result<(), PrimaryStoreError>;

    async fn failed_rows_sample(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<Value>, PrimaryStoreError>;

    /// Returns whether a sample was removed.
    async fn delete_failed_rows_sample(&self, test_case_fqn: &str)
        -> Result<bool, PrimaryStoreError>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    entities: HashMap<(String, String), EntityRecord>,
    results: HashMap<String, Vec<TestCaseResult>>,
    incidents: HashMap<String, String>,
    samples: HashMap<String, Value>,
}

impl Inner {
    fn record_mut(
        &mut self,
        entity_type: &str,
        id: &str,
    ) -> Result<&mut EntityRecord, PrimaryStoreError> {
        self.entities
            .get_mut(&(entity_type.to_string(), id.to_string()))
            .ok_or_else(|| PrimaryStoreError::entity_not_found(entity_type, id))
    }
}

/// A `PrimaryStore` held in memory. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryPrimaryStore {
    inner: RwLock<Inner>,
    failing: AtomicBool,
}

impl MemoryPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Backend`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), PrimaryStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PrimaryStoreError::Backend("write rejected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn create_entity(&self, record: EntityRecord) -> Result<EntityRecord, PrimaryStoreError> {
        self.check_write()?;
        let key = (record.header.entity_type.clone(), record.header.id.clone());
        let mut inner = self.inner.write().await;
        if inner.entities.contains_key(&key) {
            return Err(PrimaryStoreError::Backend(format!(
                "entity already exists: {}",
                record.header
            )));
        }
        inner.entities.insert(key, record.clone());
        Ok(record)
    }

    async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(&(entity_type.to_string(), id.to_string()))
            .filter(|r| include.admits(r.deleted))
            .cloned()
            .ok_or_else(|| PrimaryStoreError::entity_not_found(entity_type, id))
    }

    async fn get_entity_by_name(
        &self,
        entity_type: &str,
        fqn: &str,
        include: Include,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        let inner = self.inner.read().await;
        inner
            .entities
            .values()
            .find(|r| {
                r.header.entity_type == entity_type
                    && r.header.fqn == fqn
                    && include.admits(r.deleted)
            })
            .cloned()
            .ok_or_else(|| PrimaryStoreError::entity_not_found(entity_type, fqn))
    }

    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        patch: &Document,
    ) -> Result<(EntityRecord, Vec<FieldChange>), PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(entity_type, id)?;
        if record.deleted {
            return Err(PrimaryStoreError::entity_not_found(entity_type, id));
        }
        let changes = diff_and_apply(&mut record.fields, patch);
        Ok((record.clone(), changes))
    }

    async fn set_deleted(
        &self,
        entity_type: &str,
        id: &str,
        deleted: bool,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(entity_type, id)?;
        record.deleted = deleted;
        Ok(record.clone())
    }

    async fn delete_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<EntityRecord, PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        inner
            .entities
            .remove(&(entity_type.to_string(), id.to_string()))
            .ok_or_else(|| PrimaryStoreError::entity_not_found(entity_type, id))
    }

    async fn append_result(&self, result: TestCaseResult) -> Result<(), PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        inner
            .results
            .entry(result.test_case_fqn.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    async fn results_in_range(
        &self,
        test_case_fqn: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TestCaseResult>, PrimaryStoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .results
            .get(test_case_fqn)
            .map(|history| {
                history
                    .iter()
                    .filter(|r| r.timestamp >= start && r.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<Option<TestCaseResult>, PrimaryStoreError> {
        let inner = self.inner.read().await;
        Ok(inner.results.get(test_case_fqn).and_then(|history| {
            history
                .iter()
                .rev()
                .find(|r| r.timestamp == timestamp)
                .cloned()
        }))
    }

    async fn delete_result_at(
        &self,
        test_case_fqn: &str,
        timestamp: i64,
    ) -> Result<TestCaseResult, PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        let not_found = || PrimaryStoreError::ResultNotFound {
            test_case_fqn: test_case_fqn.to_string(),
            timestamp,
        };
        let history = inner.results.get_mut(test_case_fqn).ok_or_else(not_found)?;
        let pos = history
            .iter()
            .rposition(|r| r.timestamp == timestamp)
            .ok_or_else(not_found)?;
        Ok(history.remove(pos))
    }

    async fn current_incident(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<String>, PrimaryStoreError> {
        Ok(self.inner.read().await.incidents.get(test_case_fqn).cloned())
    }

    async fn open_incident(&self, test_case_fqn: &str) -> Result<String, PrimaryStoreError> {
        self.check_write()?;
        let mut inner = self.inner.write().await;
        Ok(inner
            .incidents
            .entry(test_case_fqn.to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone())
    }

    async fn resolve_incident(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<String>, PrimaryStoreError> {
        self.check_write()?;
        Ok(self.inner.write().await.incidents.remove(test_case_fqn))
    }

    async fn put_failed_rows_sample(
        &self,
        test_case_fqn: &str,
        sample: Value,
    ) -> Result<(), PrimaryStoreError> {
        self.check_write()?;
        self.inner
            .write()
            .await
            .samples
            .insert(test_case_fqn.to_string(), sample);
        Ok(())
    }

    async fn failed_rows_sample(
        &self,
        test_case_fqn: &str,
    ) -> Result<Option<Value>, PrimaryStoreError> {
        Ok(self.inner.read().await.samples.get(test_case_fqn).cloned())
    }

    async fn delete_failed_rows_sample(
        &self,
        test_case_fqn: &str,
    ) -> Result<bool, PrimaryStoreError> {
        self.check_write()?;
        Ok(self
            .inner
            .write()
            .await
            .samples
            .remove(test_case_fqn)
            .is_some())
    }
}
