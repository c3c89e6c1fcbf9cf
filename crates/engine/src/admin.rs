//! Idempotent index and alias lifecycle.

use std::sync::Arc;

use searchsync_core::Document;
use searchsync_index::{mapping_conflicts, IndexDefinition, IndexError, SearchBackend};

use crate::config::IndexMapping;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The index was already there with a compatible mapping.
    AlreadyExists,
}

pub struct IndexAdmin {
    backend: Arc<dyn SearchBackend>,
}

impl IndexAdmin {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        IndexAdmin { backend }
    }

    pub async fn index_exists(&self, name: &str) -> Result<bool, SyncError> {
        Ok(self.backend.index_exists(name).await?)
    }

    /// Create the index, or leave an existing compatible one alone. The
    /// definition's aliases are ensured either way.
    pub async fn create_index(&self, def: &IndexDefinition) -> Result<CreateOutcome, SyncError> {
        if !self.backend.index_exists(&def.name).await? {
            self.backend.create_index(def).await?;
            tracing::info!(index = %def.name, aliases = ?def.aliases, "created index");
            return Ok(CreateOutcome::Created);
        }
        let existing = self.backend.get_mapping(&def.name).await?;
        if let Some(field) = mapping_conflicts(&existing, &def.mapping).into_iter().next() {
            return Err(SyncError::Index(IndexError::MappingConflict {
                index: def.name.clone(),
                field,
            }));
        }
        self.add_index_alias(&def.name, &def.aliases).await?;
        tracing::debug!(index = %def.name, "index already exists");
        Ok(CreateOutcome::AlreadyExists)
    }

    /// Merge new field definitions into an existing index's mapping.
    pub async fn update_index(&self, name: &str, mapping: &Document) -> Result<(), SyncError> {
        self.backend.put_mapping(name, mapping).await?;
        tracing::info!(index = name, fields = mapping.len(), "updated index mapping");
        Ok(())
    }

    /// Delete the index and its aliases. Returns `false` if it was absent.
    pub async fn delete_index(&self, name: &str) -> Result<bool, SyncError> {
        if !self.backend.index_exists(name).await? {
            return Ok(false);
        }
        self.backend.delete_index(name).await?;
        tracing::info!(index = name, "deleted index");
        Ok(true)
    }

    /// Point the mapping's own alias, its parent aliases and the global
    /// alias at its index.
    pub async fn create_aliases(
        &self,
        mapping: &IndexMapping,
        global_alias: &str,
    ) -> Result<(), SyncError> {
        let def = mapping.definition(global_alias);
        self.add_index_alias(&def.name, &def.aliases).await
    }

    pub async fn add_index_alias(&self, index: &str, aliases: &[String]) -> Result<(), SyncError> {
        let current = self.backend.get_aliases(index).await?;
        for alias in aliases.iter().filter(|a| !current.contains(a)) {
            self.backend.put_alias(index, alias).await?;
            tracing::debug!(index, alias = %alias, "added alias");
        }
        Ok(())
    }
}
