//! The mutation router: primary-store change in, index targets out.
//!
//! Routing is a pure function of the [`Change`] and the [`RoutingTable`]. It
//! never looks at the index, so targets may name documents that do not exist
//! yet; the scripts they carry are no-ops in that case.
//!
//! Targets come out in application order: the changed entity's own document
//! first, then dependent documents. Executors must preserve that order.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{
    Document, Selector, DELETED_FIELD, DOMAIN_FIELD, ENTITY_TYPE_FIELD, FQN_FIELD, ID_FIELD,
    OWNERS_FIELD, TAGS_FIELD, TEST_SUITES_FIELD,
};
use crate::error::RouteError;
use crate::model::{EntityHeader, EntityReference, LineageDirection, LineageEdge, TagLabel};
use crate::script::Script;

// ── Changes ──────────────────────────────────────────────────────────

/// One field of an entity update, with its value before and after.
/// A missing or null `new_value` means the field was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub name: String,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
}

impl FieldChange {
    pub fn new(name: &str, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        FieldChange {
            name: name.to_string(),
            old_value,
            new_value,
        }
    }

    fn old(&self) -> Option<&Value> {
        self.old_value.as_ref().filter(|v| !v.is_null())
    }

    fn new_val(&self) -> Option<&Value> {
        self.new_value.as_ref().filter(|v| !v.is_null())
    }
}

/// Embedded collections whose membership can change independently of the
/// rest of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Tags,
    TestSuites,
}

/// A committed primary-store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "change",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Change {
    EntityCreated {
        entity: EntityHeader,
        document: Document,
    },
    EntityUpdated {
        entity: EntityHeader,
        changes: Vec<FieldChange>,
    },
    EntitySoftDeleted {
        entity: EntityHeader,
    },
    EntityRestored {
        entity: EntityHeader,
    },
    EntityDeleted {
        entity: EntityHeader,
    },
    LineageAdded {
        from: EntityHeader,
        to: EntityHeader,
        #[serde(default)]
        details: Document,
    },
    LineageRemoved {
        from: EntityHeader,
        to: EntityHeader,
    },
    MembershipChanged {
        entity: EntityHeader,
        collection: Collection,
        #[serde(default)]
        added: Vec<Value>,
        #[serde(default)]
        removed: Vec<Value>,
    },
}

impl Change {
    /// The entity whose document receives the direct update.
    pub fn subject(&self) -> &EntityHeader {
        match self {
            Change::EntityCreated { entity, .. }
            | Change::EntityUpdated { entity, .. }
            | Change::EntitySoftDeleted { entity }
            | Change::EntityRestored { entity }
            | Change::EntityDeleted { entity }
            | Change::MembershipChanged { entity, .. } => entity,
            Change::LineageAdded { from, .. } | Change::LineageRemoved { from, .. } => from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::EntityCreated { .. } => "entityCreated",
            Change::EntityUpdated { .. } => "entityUpdated",
            Change::EntitySoftDeleted { .. } => "entitySoftDeleted",
            Change::EntityRestored { .. } => "entityRestored",
            Change::EntityDeleted { .. } => "entityDeleted",
            Change::LineageAdded { .. } => "lineageAdded",
            Change::LineageRemoved { .. } => "lineageRemoved",
            Change::MembershipChanged { .. } => "membershipChanged",
        }
    }
}

// ── Targets ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum TargetAction {
    /// Write the full document (create or replace).
    Index { document: Document },
    /// Apply a partial-update script.
    Script { script: Script },
    /// Remove the selected documents.
    Delete,
}

/// One pending index mutation: where, which documents, and what to do.
/// Computed per change and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationTarget {
    pub index: String,
    pub selector: Selector,
    pub action: TargetAction,
}

impl PropagationTarget {
    pub fn index(index: &str, id: &str, document: Document) -> Self {
        PropagationTarget {
            index: index.to_string(),
            selector: Selector::id(id),
            action: TargetAction::Index { document },
        }
    }

    pub fn script(index: &str, selector: Selector, script: Script) -> Self {
        PropagationTarget {
            index: index.to_string(),
            selector,
            action: TargetAction::Script { script },
        }
    }

    pub fn delete(index: &str, selector: Selector) -> Self {
        PropagationTarget {
            index: index.to_string(),
            selector,
            action: TargetAction::Delete,
        }
    }

    /// The document id, when the target addresses a single document.
    pub fn doc_id(&self) -> Option<&str> {
        self.selector.as_id()
    }

    /// The field written, when the action is a single-field script.
    pub fn field(&self) -> Option<&str> {
        match &self.action {
            TargetAction::Script { script } => script.field(),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        let action = match &self.action {
            TargetAction::Index { .. } => "index",
            TargetAction::Script { script } => script.name(),
            TargetAction::Delete => "delete",
        };
        format!("{action} {} {:?}", self.index, self.selector)
    }
}

// ── Routing table ────────────────────────────────────────────────────

/// Documents that embed a reference to a parent entity, found by the field
/// holding the parent's id (e.g. tables carry `databaseSchema.id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildScope {
    pub child_indexes: Vec<String>,
    pub parent_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKey {
    Id,
    Fqn,
}

/// Where other documents embed references to entities of `entity_type`,
/// so that a hard delete can strip them (tags, test suites, domains).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedReference {
    pub entity_type: String,
    pub field: String,
    pub key_field: String,
    pub key: ReferenceKey,
    /// A single embedded object rather than a list.
    #[serde(default)]
    pub single: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    indexes: BTreeMap<String, String>,
    children: BTreeMap<String, Vec<ChildScope>>,
    references: Vec<EmbeddedReference>,
    global_alias: String,
}

impl RoutingTable {
    pub fn new(global_alias: &str) -> Self {
        RoutingTable {
            global_alias: global_alias.to_string(),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, entity_type: &str, index: &str) -> Self {
        self.indexes
            .insert(entity_type.to_string(), index.to_string());
        self
    }

    pub fn with_children(mut self, parent_type: &str, scope: ChildScope) -> Self {
        self.children
            .entry(parent_type.to_string())
            .or_default()
            .push(scope);
        self
    }

    pub fn with_reference(mut self, reference: EmbeddedReference) -> Self {
        self.references.push(reference);
        self
    }

    pub fn index_for(&self, entity_type: &str) -> Result<&str, RouteError> {
        self.indexes
            .get(entity_type)
            .map(String::as_str)
            .ok_or_else(|| RouteError::UnknownEntityType {
                entity_type: entity_type.to_string(),
            })
    }

    pub fn children_of(&self, entity_type: &str) -> &[ChildScope] {
        self.children
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn references_to<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a EmbeddedReference> + 'a {
        self.references
            .iter()
            .filter(move |r| r.entity_type == entity_type)
    }

    pub fn global_alias(&self) -> &str {
        &self.global_alias
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }
}

// ── Router ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Router {
    table: RoutingTable,
}

impl Router {
    pub fn new(table: RoutingTable) -> Self {
        Router { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn route(&self, change: &Change) -> Result<Vec<PropagationTarget>, RouteError> {
        let mut out = Vec::new();
        match change {
            Change::EntityCreated { entity, document } => {
                self.route_created(entity, document, &mut out)?
            }
            Change::EntityUpdated { entity, changes } => {
                self.route_updated(entity, changes, &mut out)?
            }
            Change::EntitySoftDeleted { entity } => self.route_soft_delete(entity, true, &mut out)?,
            Change::EntityRestored { entity } => self.route_soft_delete(entity, false, &mut out)?,
            Change::EntityDeleted { entity } => self.route_deleted(entity, &mut out)?,
            Change::LineageAdded { from, to, details } => {
                let edges = [
                    (from, to, LineageDirection::Downstream),
                    (to, from, LineageDirection::Upstream),
                ];
                for (source, target, direction) in edges {
                    let edge = LineageEdge::new(&source.id, &target.id, direction)
                        .with_extra(details.clone());
                    out.push(PropagationTarget::script(
                        self.table.index_for(&source.entity_type)?,
                        Selector::id(&source.id),
                        Script::UpsertLineageEdge { edge },
                    ));
                }
            }
            Change::LineageRemoved { from, to } => {
                let edges = [
                    (from, to, LineageDirection::Downstream),
                    (to, from, LineageDirection::Upstream),
                ];
                for (source, target, direction) in edges {
                    out.push(PropagationTarget::script(
                        self.table.index_for(&source.entity_type)?,
                        Selector::id(&source.id),
                        Script::RemoveLineageEdge {
                            target_doc_id: target.id.clone(),
                            direction: Some(direction),
                        },
                    ));
                }
            }
            Change::MembershipChanged {
                entity,
                collection,
                added,
                removed,
            } => self.route_membership(entity, *collection, added, removed, &mut out)?,
        }
        tracing::debug!(
            change = change.kind(),
            entity = %change.subject(),
            targets = out.len(),
            "routed change"
        );
        Ok(out)
    }

    fn route_created(
        &self,
        entity: &EntityHeader,
        document: &Document,
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let index = self.table.index_for(&entity.entity_type)?;
        let mut doc = document.clone();
        doc.entry(ID_FIELD)
            .or_insert_with(|| Value::String(entity.id.clone()));
        doc.entry(FQN_FIELD)
            .or_insert_with(|| Value::String(entity.fqn.clone()));
        doc.entry(ENTITY_TYPE_FIELD)
            .or_insert_with(|| Value::String(entity.entity_type.clone()));
        doc.entry(DELETED_FIELD).or_insert(Value::Bool(false));
        out.push(PropagationTarget::index(index, &entity.id, doc));
        Ok(())
    }

    fn route_updated(
        &self,
        entity: &EntityHeader,
        changes: &[FieldChange],
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let index = self.table.index_for(&entity.entity_type)?;
        let own = Selector::id(&entity.id);

        let mut fields = Document::new();
        let mut removed = Vec::new();
        for change in changes {
            match change.new_val() {
                Some(value) => {
                    fields.insert(change.name.clone(), value.clone());
                }
                None => removed.push(change.name.clone()),
            }
        }
        if !fields.is_empty() {
            out.push(PropagationTarget::script(
                index,
                own.clone(),
                Script::SetFields { fields },
            ));
        }
        for field in removed {
            out.push(PropagationTarget::script(
                index,
                own.clone(),
                Script::RemoveField { field },
            ));
        }

        for change in changes {
            match change.name.as_str() {
                OWNERS_FIELD => self.propagate_owners(entity, change, out)?,
                DOMAIN_FIELD => self.propagate_reference(entity, change, out)?,
                TAGS_FIELD => {
                    let old = tag_list(TAGS_FIELD, change.old())?;
                    let new = tag_list(TAGS_FIELD, change.new_val())?;
                    let added = difference(&new, &old);
                    let dropped = difference(&old, &new);
                    self.propagate_tags(entity, added, dropped, out);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn propagate_owners(
        &self,
        entity: &EntityHeader,
        change: &FieldChange,
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let old = reference_list(OWNERS_FIELD, change.old())?;
        let new = reference_list(OWNERS_FIELD, change.new_val())?;
        let kept: HashSet<&str> = new.iter().map(|o| o.id.as_str()).collect();
        let deleted: Vec<EntityReference> = old
            .into_iter()
            .filter(|o| !kept.contains(o.id.as_str()))
            .collect();

        if !deleted.is_empty() {
            self.for_children(entity, Script::RemoveOwners { deleted_owners: deleted }, out);
        }
        if !new.is_empty() {
            self.for_children(entity, Script::MergeOwners { updated_owners: new }, out);
        }
        Ok(())
    }

    /// Single-valued inherited reference (domain). First-time propagation
    /// claims absent or inherited children; a change of value only claims
    /// children still carrying the previous value.
    fn propagate_reference(
        &self,
        entity: &EntityHeader,
        change: &FieldChange,
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let old = change.old().map(|v| single_reference(&change.name, v)).transpose()?;
        let new = change.new_val();
        let script = match (old, new) {
            (None, None) => return Ok(()),
            (old, Some(value)) => Script::PropagateIfAbsentOrInherited {
                field: change.name.clone(),
                value: value.clone(),
                source_id: old.map(|o| o.id),
            },
            (Some(old), None) => Script::RemoveIfInheritedMatches {
                field: change.name.clone(),
                source_id: Some(old.id),
            },
        };
        self.for_children(entity, script, out);
        Ok(())
    }

    fn propagate_tags(
        &self,
        entity: &EntityHeader,
        added: Vec<TagLabel>,
        removed: Vec<TagLabel>,
        out: &mut Vec<PropagationTarget>,
    ) {
        for tag in removed {
            self.for_children(
                entity,
                Script::RemoveChildReference {
                    field: TAGS_FIELD.to_string(),
                    key_field: "tagFQN".to_string(),
                    key: tag.tag_fqn,
                    inherited_only: true,
                },
                out,
            );
        }
        if !added.is_empty() {
            let added = added.into_iter().map(TagLabel::inherited).collect();
            self.for_children(
                entity,
                Script::MergeTags {
                    added,
                    removed: Vec::new(),
                },
                out,
            );
        }
    }

    fn route_soft_delete(
        &self,
        entity: &EntityHeader,
        deleted: bool,
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let index = self.table.index_for(&entity.entity_type)?;
        out.push(PropagationTarget::script(
            index,
            Selector::id(&entity.id),
            Script::SoftDeleteRestore { deleted },
        ));
        self.for_children(entity, Script::SoftDeleteRestore { deleted }, out);
        Ok(())
    }

    fn route_deleted(
        &self,
        entity: &EntityHeader,
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let index = self.table.index_for(&entity.entity_type)?;
        out.push(PropagationTarget::delete(index, Selector::id(&entity.id)));
        for scope in self.table.children_of(&entity.entity_type) {
            for child in &scope.child_indexes {
                out.push(PropagationTarget::delete(
                    child,
                    Selector::field(&scope.parent_field, &entity.id),
                ));
            }
        }

        let global = self.table.global_alias();
        for reference in self.table.references_to(&entity.entity_type) {
            let key = match reference.key {
                ReferenceKey::Id => &entity.id,
                ReferenceKey::Fqn => &entity.fqn,
            };
            let selector =
                Selector::field(&format!("{}.{}", reference.field, reference.key_field), key);
            let script = if reference.single {
                Script::RemoveField {
                    field: reference.field.clone(),
                }
            } else {
                Script::RemoveChildReference {
                    field: reference.field.clone(),
                    key_field: reference.key_field.clone(),
                    key: key.clone(),
                    inherited_only: false,
                }
            };
            out.push(PropagationTarget::script(global, selector, script));
        }

        out.push(PropagationTarget::script(
            global,
            Selector::field("lineage.targetDocId", &entity.id),
            Script::RemoveLineageEdge {
                target_doc_id: entity.id.clone(),
                direction: None,
            },
        ));
        Ok(())
    }

    fn route_membership(
        &self,
        entity: &EntityHeader,
        collection: Collection,
        added: &[Value],
        removed: &[Value],
        out: &mut Vec<PropagationTarget>,
    ) -> Result<(), RouteError> {
        let index = self.table.index_for(&entity.entity_type)?;
        let own = Selector::id(&entity.id);
        match collection {
            Collection::Tags => {
                let added = parse_tags(TAGS_FIELD, added)?;
                let removed = parse_tags(TAGS_FIELD, removed)?;
                out.push(PropagationTarget::script(
                    index,
                    own,
                    Script::MergeTags {
                        added: added.clone(),
                        removed: removed.clone(),
                    },
                ));
                self.propagate_tags(entity, added, removed, out);
            }
            Collection::TestSuites => {
                for entry in removed {
                    let suite = single_reference(TEST_SUITES_FIELD, entry)?;
                    out.push(PropagationTarget::script(
                        index,
                        own.clone(),
                        Script::RemoveChildReference {
                            field: TEST_SUITES_FIELD.to_string(),
                            key_field: ID_FIELD.to_string(),
                            key: suite.id,
                            inherited_only: false,
                        },
                    ));
                }
                for entry in added {
                    single_reference(TEST_SUITES_FIELD, entry)?;
                    out.push(PropagationTarget::script(
                        index,
                        own.clone(),
                        Script::UpsertChildReference {
                            field: TEST_SUITES_FIELD.to_string(),
                            key_field: ID_FIELD.to_string(),
                            entry: entry.clone(),
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    fn for_children(&self, entity: &EntityHeader, script: Script, out: &mut Vec<PropagationTarget>) {
        for scope in self.table.children_of(&entity.entity_type) {
            for child in &scope.child_indexes {
                out.push(PropagationTarget::script(
                    child,
                    Selector::field(&scope.parent_field, &entity.id),
                    script.clone(),
                ));
            }
        }
    }
}

// ── Value parsing ────────────────────────────────────────────────────

fn malformed(field: &str, message: &str) -> RouteError {
    RouteError::MalformedValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn single_reference(field: &str, value: &Value) -> Result<EntityReference, RouteError> {
    EntityReference::from_value(value).ok_or_else(|| malformed(field, "expected an entity reference"))
}

fn reference_list(field: &str, value: Option<&Value>) -> Result<Vec<EntityReference>, RouteError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(|v| single_reference(field, v)).collect(),
        Some(other) => Ok(vec![single_reference(field, other)?]),
    }
}

fn parse_tags(field: &str, values: &[Value]) -> Result<Vec<TagLabel>, RouteError> {
    values
        .iter()
        .map(|v| TagLabel::from_value(v).ok_or_else(|| malformed(field, "expected a tag label")))
        .collect()
}

fn tag_list(field: &str, value: Option<&Value>) -> Result<Vec<TagLabel>, RouteError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => parse_tags(field, items),
        Some(_) => Err(malformed(field, "expected a list of tag labels")),
    }
}

/// Tags in `a` whose key is not in `b`.
fn difference(a: &[TagLabel], b: &[TagLabel]) -> Vec<TagLabel> {
    a.iter()
        .filter(|t| !b.iter().any(|o| o.tag_fqn.eq_ignore_ascii_case(&t.tag_fqn)))
        .cloned()
        .collect()
}
