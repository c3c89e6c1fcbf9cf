//! Engine configuration: queue bound, index catalogue and hierarchy.
//!
//! Every field has a default, so an empty TOML document yields the built-in
//! catalogue (database service -> database -> schema -> table, test suites,
//! test cases and their results, tags, glossary terms and domains).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use searchsync_core::{ChildScope, Document, EmbeddedReference, ReferenceKey, RoutingTable};
use searchsync_index::IndexDefinition;

use crate::error::SyncError;

/// One entity type and the index that mirrors it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMapping {
    pub entity_type: String,
    pub index_name: String,
    /// Short alias for the index; defaults to the entity type.
    #[serde(default)]
    pub alias: Option<String>,
    /// Aliases of ancestor entity types that also cover this index.
    #[serde(default)]
    pub parent_aliases: Vec<String>,
    #[serde(default)]
    pub mapping: Document,
}

impl IndexMapping {
    pub fn new(entity_type: &str, index_name: &str, parent_aliases: &[&str]) -> Self {
        IndexMapping {
            entity_type: entity_type.to_string(),
            index_name: index_name.to_string(),
            alias: None,
            parent_aliases: parent_aliases.iter().map(|s| s.to_string()).collect(),
            mapping: Document::new(),
        }
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity_type)
    }

    /// The definition created at bootstrap: own alias, parent aliases and
    /// the global alias.
    pub fn definition(&self, global_alias: &str) -> IndexDefinition {
        let mut def = IndexDefinition::new(&self.index_name)
            .with_mapping(self.mapping.clone())
            .with_alias(self.alias());
        for parent in &self.parent_aliases {
            def = def.with_alias(parent);
        }
        def.with_alias(global_alias)
    }
}

/// Child documents of `parent_type`, found through `parent_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyRule {
    pub parent_type: String,
    pub child_indexes: Vec<String>,
    pub parent_field: String,
}

impl HierarchyRule {
    fn new(parent_type: &str, child_indexes: &[&str], parent_field: &str) -> Self {
        HierarchyRule {
            parent_type: parent_type.to_string(),
            child_indexes: child_indexes.iter().map(|s| s.to_string()).collect(),
            parent_field: parent_field.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub log_level: String,
    pub global_alias: String,
    pub indexes: Vec<IndexMapping>,
    pub hierarchy: Vec<HierarchyRule>,
    pub references: Vec<EmbeddedReference>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            queue_capacity: 1000,
            log_level: "info".to_string(),
            global_alias: "all".to_string(),
            indexes: default_indexes(),
            hierarchy: default_hierarchy(),
            references: default_references(),
        }
    }
}

fn default_indexes() -> Vec<IndexMapping> {
    vec![
        IndexMapping::new("databaseService", "database_service_search_index", &[]),
        IndexMapping::new("database", "database_search_index", &["databaseService"]),
        IndexMapping::new(
            "databaseSchema",
            "database_schema_search_index",
            &["database", "databaseService"],
        ),
        IndexMapping::new(
            "table",
            "table_search_index",
            &["databaseSchema", "database", "databaseService"],
        ),
        IndexMapping::new("testSuite", "test_suite_search_index", &[]),
        IndexMapping::new("testCase", "test_case_search_index", &["testSuite"]),
        IndexMapping::new(
            "testCaseResult",
            "test_case_result_search_index",
            &["testCase", "testSuite"],
        ),
        IndexMapping::new("tag", "tag_search_index", &[]),
        IndexMapping::new("glossaryTerm", "glossary_term_search_index", &[]),
        IndexMapping::new("domain", "domain_search_index", &[]),
    ]
}

fn default_hierarchy() -> Vec<HierarchyRule> {
    vec![
        HierarchyRule::new(
            "databaseService",
            &[
                "database_search_index",
                "database_schema_search_index",
                "table_search_index",
            ],
            "service.id",
        ),
        HierarchyRule::new(
            "database",
            &["database_schema_search_index", "table_search_index"],
            "database.id",
        ),
        HierarchyRule::new("databaseSchema", &["table_search_index"], "databaseSchema.id"),
        HierarchyRule::new("testSuite", &["test_case_search_index"], "testSuite.id"),
        HierarchyRule::new("testCase", &["test_case_result_search_index"], "testCase.id"),
    ]
}

fn default_references() -> Vec<EmbeddedReference> {
    let reference = |entity_type: &str, field: &str, key_field: &str, key, single| {
        EmbeddedReference {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            key_field: key_field.to_string(),
            key,
            single,
        }
    };
    vec![
        reference("tag", "tags", "tagFQN", ReferenceKey::Fqn, false),
        reference("glossaryTerm", "tags", "tagFQN", ReferenceKey::Fqn, false),
        reference("testSuite", "testSuites", "id", ReferenceKey::Id, false),
        reference("domain", "domain", "id", ReferenceKey::Id, true),
    ]
}

impl EngineConfig {
    /// Check the catalogue is self-consistent.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.queue_capacity == 0 {
            return Err(SyncError::Config("queue_capacity must be at least 1".into()));
        }
        if self.global_alias.trim().is_empty() {
            return Err(SyncError::Config("global_alias must not be empty".into()));
        }
        let mut types = HashSet::new();
        let mut names = HashSet::new();
        for m in &self.indexes {
            if !types.insert(m.entity_type.as_str()) {
                return Err(SyncError::Config(format!(
                    "entity type {} is mapped twice",
                    m.entity_type
                )));
            }
            if !names.insert(m.index_name.as_str()) {
                return Err(SyncError::Config(format!(
                    "index name {} is used twice",
                    m.index_name
                )));
            }
            if m.index_name == self.global_alias {
                return Err(SyncError::Config(format!(
                    "index name {} collides with the global alias",
                    m.index_name
                )));
            }
        }
        for rule in &self.hierarchy {
            if !types.contains(rule.parent_type.as_str()) {
                return Err(SyncError::Config(format!(
                    "hierarchy names unknown parent type {}",
                    rule.parent_type
                )));
            }
            if let Some(unknown) = rule
                .child_indexes
                .iter()
                .find(|i| !names.contains(i.as_str()))
            {
                return Err(SyncError::Config(format!(
                    "hierarchy of {} names unknown index {unknown}",
                    rule.parent_type
                )));
            }
        }
        if let Some(r) = self
            .references
            .iter()
            .find(|r| !types.contains(r.entity_type.as_str()))
        {
            return Err(SyncError::Config(format!(
                "reference names unknown entity type {}",
                r.entity_type
            )));
        }
        Ok(())
    }

    pub fn routing_table(&self) -> RoutingTable {
        let mut table = RoutingTable::new(&self.global_alias);
        for m in &self.indexes {
            table = table.with_index(&m.entity_type, &m.index_name);
        }
        for rule in &self.hierarchy {
            table = table.with_children(
                &rule.parent_type,
                ChildScope {
                    child_indexes: rule.child_indexes.clone(),
                    parent_field: rule.parent_field.clone(),
                },
            );
        }
        for r in &self.references {
            table = table.with_reference(r.clone());
        }
        table
    }

    pub fn mapping_for(&self, entity_type: &str) -> Option<&IndexMapping> {
        self.indexes.iter().find(|m| m.entity_type == entity_type)
    }
}
