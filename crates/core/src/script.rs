//! The closed catalogue of partial-update scripts.
//!
//! Each variant is a pure recipe `(document, params) -> document`. Scripts are
//! idempotent: applying the same script twice leaves the document as a single
//! application did. Conditional variants use the `inherited` marker as their
//! guard, which is what lets concurrent propagations run without locks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{
    is_absent, is_inherited, mark_inherited, reference_id, Document, DELETED_FIELD, ID_FIELD,
    LINEAGE_FIELD, OWNERS_FIELD, TAGS_FIELD,
};
use crate::model::{EntityReference, LineageDirection, LineageEdge, TagLabel};

const TAG_KEY: &str = "tagFQN";
const LINEAGE_KEY: &str = "targetDocId";
const LINEAGE_DIRECTION: &str = "direction";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "script",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Script {
    /// Put every given key onto the document (direct update).
    SetFields { fields: Document },

    /// Set `field` unconditionally, marking the value inherited.
    Propagate { field: String, value: Value },

    /// Set `field` only when it is absent, or inherited. With `source_id`,
    /// an inherited value must also still point at that id.
    PropagateIfAbsentOrInherited {
        field: String,
        value: Value,
        #[serde(default)]
        source_id: Option<String>,
    },

    /// Remove `field` unconditionally.
    RemoveField { field: String },

    /// Remove `field` only when it is inherited (and, with `source_id`, still
    /// points at that id).
    RemoveIfInheritedMatches {
        field: String,
        #[serde(default)]
        source_id: Option<String>,
    },

    /// Replace the owners list when it is empty or inherited.
    MergeOwners { updated_owners: Vec<EntityReference> },

    /// Drop inherited owners whose id is listed. Explicit owners stay.
    RemoveOwners { deleted_owners: Vec<EntityReference> },

    /// Insert or replace a lineage edge, keyed by target document id and
    /// direction.
    UpsertLineageEdge { edge: LineageEdge },

    /// Drop the lineage edge pointing at `target_doc_id` in `direction`;
    /// without a direction, every edge to that target goes.
    RemoveLineageEdge {
        target_doc_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<LineageDirection>,
    },

    /// Remove tags by key, append new ones, dedupe and sort by key.
    MergeTags {
        #[serde(default)]
        added: Vec<TagLabel>,
        #[serde(default)]
        removed: Vec<TagLabel>,
    },

    /// Insert or replace an entry of an embedded collection by key.
    UpsertChildReference {
        field: String,
        key_field: String,
        entry: Value,
    },

    /// Drop entries of an embedded collection whose `key_field` equals `key`.
    RemoveChildReference {
        field: String,
        key_field: String,
        key: String,
        #[serde(default)]
        inherited_only: bool,
    },

    /// Set the soft-delete flag.
    SoftDeleteRestore { deleted: bool },
}

impl Script {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Script::SetFields { .. } => "setFields",
            Script::Propagate { .. } => "propagate",
            Script::PropagateIfAbsentOrInherited { .. } => "propagateIfAbsentOrInherited",
            Script::RemoveField { .. } => "removeField",
            Script::RemoveIfInheritedMatches { .. } => "removeIfInheritedMatches",
            Script::MergeOwners { .. } => "mergeOwners",
            Script::RemoveOwners { .. } => "removeOwners",
            Script::UpsertLineageEdge { .. } => "upsertLineageEdge",
            Script::RemoveLineageEdge { .. } => "removeLineageEdge",
            Script::MergeTags { .. } => "mergeTags",
            Script::UpsertChildReference { .. } => "upsertChildReference",
            Script::RemoveChildReference { .. } => "removeChildReference",
            Script::SoftDeleteRestore { .. } => "softDeleteRestore",
        }
    }

    /// The document field this script writes, when there is a single one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Script::SetFields { .. } => None,
            Script::Propagate { field, .. }
            | Script::PropagateIfAbsentOrInherited { field, .. }
            | Script::RemoveField { field }
            | Script::RemoveIfInheritedMatches { field, .. }
            | Script::UpsertChildReference { field, .. }
            | Script::RemoveChildReference { field, .. } => Some(field),
            Script::MergeOwners { .. } | Script::RemoveOwners { .. } => Some(OWNERS_FIELD),
            Script::UpsertLineageEdge { .. } | Script::RemoveLineageEdge { .. } => {
                Some(LINEAGE_FIELD)
            }
            Script::MergeTags { .. } => Some(TAGS_FIELD),
            Script::SoftDeleteRestore { .. } => Some(DELETED_FIELD),
        }
    }

    /// Apply the script in place. Returns `true` if the document changed.
    pub fn apply(&self, doc: &mut Document) -> bool {
        let before = doc.clone();
        self.mutate(doc);
        *doc != before
    }

    fn mutate(&self, doc: &mut Document) {
        match self {
            Script::SetFields { fields } => {
                for (k, v) in fields {
                    doc.insert(k.clone(), v.clone());
                }
            }
            Script::Propagate { field, value } => {
                doc.insert(field.clone(), mark_inherited(value));
            }
            Script::PropagateIfAbsentOrInherited {
                field,
                value,
                source_id,
            } => {
                if owned_by_source(doc.get(field), source_id.as_deref()) {
                    doc.insert(field.clone(), mark_inherited(value));
                }
            }
            Script::RemoveField { field } => {
                doc.remove(field);
            }
            Script::RemoveIfInheritedMatches { field, source_id } => {
                let current = doc.get(field);
                let matches = current.is_some_and(|v| {
                    is_inherited(v)
                        && source_id
                            .as_deref()
                            .is_none_or(|id| reference_id(v) == Some(id))
                });
                if matches {
                    doc.remove(field);
                }
            }
            Script::MergeOwners { updated_owners } => {
                let current = doc.get(OWNERS_FIELD);
                if is_absent(current) || current.is_some_and(is_inherited) {
                    let owners = updated_owners
                        .iter()
                        .map(|o| mark_inherited(&o.to_value()))
                        .collect();
                    doc.insert(OWNERS_FIELD.to_string(), Value::Array(owners));
                }
            }
            Script::RemoveOwners { deleted_owners } => {
                let deleted: HashSet<&str> =
                    deleted_owners.iter().map(|o| o.id.as_str()).collect();
                if let Some(Value::Array(owners)) = doc.get_mut(OWNERS_FIELD) {
                    owners.retain(|owner| {
                        let id = owner.get(ID_FIELD).and_then(Value::as_str);
                        !(id.is_some_and(|id| deleted.contains(id)) && is_inherited(owner))
                    });
                }
            }
            Script::UpsertLineageEdge { edge } => {
                let slot = doc
                    .entry(LINEAGE_FIELD.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let Value::Array(edges) = slot {
                    let same = |e: &Value| {
                        edge_matches(e, &edge.target_doc_id, Some(edge.direction))
                    };
                    match edges.iter_mut().find(|e| same(&**e)) {
                        Some(existing) => *existing = edge.to_value(),
                        None => edges.push(edge.to_value()),
                    }
                }
            }
            Script::RemoveLineageEdge {
                target_doc_id,
                direction,
            } => {
                if let Some(Value::Array(edges)) = doc.get_mut(LINEAGE_FIELD) {
                    edges.retain(|e| !edge_matches(e, target_doc_id, *direction));
                }
            }
            Script::MergeTags { added, removed } => merge_tags(doc, added, removed),
            Script::UpsertChildReference {
                field,
                key_field,
                entry,
            } => upsert_by_key(doc, field, key_field, entry.clone()),
            Script::RemoveChildReference {
                field,
                key_field,
                key,
                inherited_only,
            } => {
                if let Some(Value::Array(entries)) = doc.get_mut(field) {
                    entries.retain(|e| {
                        !(key_matches(e, key_field, key) && (!inherited_only || is_inherited(e)))
                    });
                }
            }
            Script::SoftDeleteRestore { deleted } => {
                doc.insert(DELETED_FIELD.to_string(), Value::Bool(*deleted));
            }
        }
    }
}

/// A field may be overwritten by propagation when it is absent, or inherited
/// and (if a source is named) still carrying the source's id.
fn owned_by_source(current: Option<&Value>, source_id: Option<&str>) -> bool {
    if is_absent(current) {
        return true;
    }
    current.is_some_and(|v| {
        is_inherited(v) && source_id.is_none_or(|id| reference_id(v) == Some(id))
    })
}

fn key_matches(entry: &Value, key_field: &str, key: &str) -> bool {
    entry
        .get(key_field)
        .and_then(Value::as_str)
        .is_some_and(|k| k.eq_ignore_ascii_case(key))
}

fn edge_matches(entry: &Value, target: &str, direction: Option<LineageDirection>) -> bool {
    key_matches(entry, LINEAGE_KEY, target)
        && direction.is_none_or(|d| key_matches(entry, LINEAGE_DIRECTION, d.as_str()))
}

fn upsert_by_key(doc: &mut Document, field: &str, key_field: &str, entry: Value) {
    let Some(key) = entry.get(key_field).and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    if let Value::Array(entries) = slot {
        match entries.iter_mut().find(|e| key_matches(e, key_field, &key)) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
}

/// Existing entries win over added ones with the same key, so an explicitly
/// assigned tag is never replaced by a propagated copy.
fn merge_tags(doc: &mut Document, added: &[TagLabel], removed: &[TagLabel]) {
    let mut tags: Vec<Value> = match doc.get(TAGS_FIELD) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    tags.retain(|t| !removed.iter().any(|r| key_matches(t, TAG_KEY, &r.tag_fqn)));
    tags.extend(added.iter().map(TagLabel::to_value));

    let mut seen = HashSet::new();
    tags.retain(|t| match t.get(TAG_KEY).and_then(Value::as_str) {
        Some(key) => seen.insert(key.to_ascii_lowercase()),
        None => false,
    });
    tags.sort_by(|a, b| {
        let ka = a.get(TAG_KEY).and_then(Value::as_str).unwrap_or_default();
        let kb = b.get(TAG_KEY).and_then(Value::as_str).unwrap_or_default();
        ka.cmp(kb)
    });
    doc.insert(TAGS_FIELD.to_string(), Value::Array(tags));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn domain(id: &str) -> Value {
        json!({"id": id, "type": "domain"})
    }

    #[test]
    fn propagate_marks_objects_inherited() {
        let mut d = doc(json!({"id": "t"}));
        let script = Script::Propagate {
            field: "domain".to_string(),
            value: domain("d-1"),
        };
        assert!(script.apply(&mut d));
        assert_eq!(d["domain"]["inherited"], true);
        assert!(!script.apply(&mut d));
    }

    #[test]
    fn propagate_if_absent_or_inherited_respects_explicit_values() {
        let script = Script::PropagateIfAbsentOrInherited {
            field: "domain".to_string(),
            value: domain("d-2"),
            source_id: None,
        };

        let mut absent = doc(json!({"id": "a"}));
        assert!(script.apply(&mut absent));
        assert_eq!(absent["domain"]["id"], "d-2");

        let mut inherited = doc(json!({"domain": {"id": "d-1", "inherited": true}}));
        assert!(script.apply(&mut inherited));
        assert_eq!(inherited["domain"]["id"], "d-2");
        assert_eq!(inherited["domain"]["inherited"], true);

        let mut explicit = doc(json!({"domain": {"id": "d-9"}}));
        assert!(!script.apply(&mut explicit));
        assert_eq!(explicit["domain"]["id"], "d-9");
    }

    #[test]
    fn propagate_with_source_only_replaces_matching_inherited_value() {
        let script = Script::PropagateIfAbsentOrInherited {
            field: "domain".to_string(),
            value: domain("d-2"),
            source_id: Some("d-1".to_string()),
        };
        let mut from_source = doc(json!({"domain": {"id": "d-1", "inherited": true}}));
        assert!(script.apply(&mut from_source));

        let mut from_elsewhere = doc(json!({"domain": {"id": "d-7", "inherited": true}}));
        assert!(!script.apply(&mut from_elsewhere));
        assert_eq!(from_elsewhere["domain"]["id"], "d-7");
    }

    #[test]
    fn remove_if_inherited_matches() {
        let script = Script::RemoveIfInheritedMatches {
            field: "domain".to_string(),
            source_id: Some("d-1".to_string()),
        };
        let mut inherited = doc(json!({"domain": {"id": "d-1", "inherited": true}}));
        assert!(script.apply(&mut inherited));
        assert!(!inherited.contains_key("domain"));

        let mut explicit = doc(json!({"domain": {"id": "d-1"}}));
        assert!(!script.apply(&mut explicit));

        let mut other = doc(json!({"domain": {"id": "d-2", "inherited": true}}));
        assert!(!script.apply(&mut other));
    }

    #[test]
    fn merge_owners_only_replaces_empty_or_inherited_lists() {
        let script = Script::MergeOwners {
            updated_owners: vec![EntityReference::new("team", "team-1")],
        };

        let mut empty = doc(json!({"owners": []}));
        assert!(script.apply(&mut empty));
        assert_eq!(empty["owners"][0]["id"], "team-1");
        assert_eq!(empty["owners"][0]["inherited"], true);

        let mut inherited = doc(json!({"owners": [{"id": "u-1", "inherited": true}]}));
        assert!(script.apply(&mut inherited));
        assert_eq!(inherited["owners"][0]["id"], "team-1");

        let mut explicit = doc(json!({"owners": [{"id": "u-2", "type": "user"}]}));
        assert!(!script.apply(&mut explicit));
    }

    #[test]
    fn remove_owners_keeps_explicit_owners() {
        let script = Script::RemoveOwners {
            deleted_owners: vec![EntityReference::new("user", "o")],
        };
        let mut explicit = doc(json!({"owners": [{"id": "o", "type": "user"}]}));
        assert!(!script.apply(&mut explicit));
        assert_eq!(explicit["owners"].as_array().unwrap().len(), 1);

        let mut inherited = doc(json!({"owners": [
            {"id": "o", "inherited": true},
            {"id": "p", "inherited": true}
        ]}));
        assert!(script.apply(&mut inherited));
        assert_eq!(inherited["owners"], json!([{"id": "p", "inherited": true}]));
    }

    #[test]
    fn lineage_upsert_never_duplicates() {
        let edge = LineageEdge::new("a", "b", LineageDirection::Downstream);
        let script = Script::UpsertLineageEdge { edge: edge.clone() };
        let mut d = doc(json!({"id": "a"}));
        script.apply(&mut d);
        script.apply(&mut d);
        assert_eq!(d["lineage"].as_array().unwrap().len(), 1);

        let mut extra = Document::new();
        extra.insert("sqlQuery".to_string(), json!("select 1"));
        let replaced = Script::UpsertLineageEdge {
            edge: edge.with_extra(extra),
        };
        assert!(replaced.apply(&mut d));
        assert_eq!(d["lineage"].as_array().unwrap().len(), 1);
        assert_eq!(d["lineage"][0]["sqlQuery"], "select 1");
    }

    #[test]
    fn lineage_remove_filters_by_target() {
        let mut d = doc(json!({"lineage": [
            {"docId": "a", "targetDocId": "b", "direction": "downstream"},
            {"docId": "a", "targetDocId": "c", "direction": "downstream"}
        ]}));
        let script = Script::RemoveLineageEdge {
            target_doc_id: "b".to_string(),
            direction: Some(LineageDirection::Downstream),
        };
        assert!(script.apply(&mut d));
        assert_eq!(d["lineage"].as_array().unwrap().len(), 1);
        assert_eq!(d["lineage"][0]["targetDocId"], "c");
        assert!(!script.apply(&mut d));
    }

    #[test]
    fn lineage_cycle_keeps_both_directions() {
        let down = LineageEdge::new("a", "b", LineageDirection::Downstream);
        let up = LineageEdge::new("a", "b", LineageDirection::Upstream);
        let mut d = doc(json!({"id": "a"}));
        Script::UpsertLineageEdge { edge: down }.apply(&mut d);
        Script::UpsertLineageEdge { edge: up }.apply(&mut d);
        assert_eq!(d["lineage"].as_array().unwrap().len(), 2);

        let remove_up = Script::RemoveLineageEdge {
            target_doc_id: "b".to_string(),
            direction: Some(LineageDirection::Upstream),
        };
        assert!(remove_up.apply(&mut d));
        assert_eq!(
            d["lineage"],
            json!([{"docId": "a", "targetDocId": "b", "direction": "downstream"}])
        );
    }

    #[test]
    fn lineage_remove_without_direction_drops_every_edge_to_target() {
        let mut d = doc(json!({"lineage": [
            {"docId": "a", "targetDocId": "b", "direction": "downstream"},
            {"docId": "a", "targetDocId": "b", "direction": "upstream"},
            {"docId": "a", "targetDocId": "c", "direction": "upstream"}
        ]}));
        let script = Script::RemoveLineageEdge {
            target_doc_id: "b".to_string(),
            direction: None,
        };
        assert!(script.apply(&mut d));
        assert_eq!(d["lineage"].as_array().unwrap().len(), 1);
        assert_eq!(d["lineage"][0]["targetDocId"], "c");
    }

    #[test]
    fn merge_tags_is_idempotent_and_sorted() {
        let mut d = doc(json!({"tags": [
            {"tagFQN": "Tier.Tier2"},
            {"tagFQN": "PII.None"}
        ]}));
        let script = Script::MergeTags {
            added: vec![TagLabel::new("PII.Sensitive"), TagLabel::new("Tier.Tier2")],
            removed: vec![TagLabel::new("PII.None")],
        };
        script.apply(&mut d);
        let once = d.clone();
        assert!(!script.apply(&mut d));
        assert_eq!(d, once);
        let keys: Vec<&str> = d["tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["tagFQN"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["PII.Sensitive", "Tier.Tier2"]);
    }

    #[test]
    fn merge_tags_keeps_explicit_entry_over_propagated_copy() {
        let mut d = doc(json!({"tags": [{"tagFQN": "PII.Sensitive", "labelType": "Manual"}]}));
        let script = Script::MergeTags {
            added: vec![TagLabel::new("PII.Sensitive").inherited()],
            removed: vec![],
        };
        script.apply(&mut d);
        assert_eq!(d["tags"][0]["labelType"], "Manual");
        assert!(d["tags"][0].get("inherited").is_none());
    }

    #[test]
    fn remove_child_reference_scoped_to_inherited() {
        let mut d = doc(json!({"tags": [
            {"tagFQN": "PII.Sensitive", "inherited": true},
            {"tagFQN": "PII.Sensitive"}
        ]}));
        let script = Script::RemoveChildReference {
            field: "tags".to_string(),
            key_field: "tagFQN".to_string(),
            key: "PII.Sensitive".to_string(),
            inherited_only: true,
        };
        assert!(script.apply(&mut d));
        assert_eq!(d["tags"], json!([{"tagFQN": "PII.Sensitive"}]));
    }

    #[test]
    fn soft_delete_restore_toggles_flag() {
        let mut d = doc(json!({"id": "x"}));
        Script::SoftDeleteRestore { deleted: true }.apply(&mut d);
        assert_eq!(d["deleted"], true);
        Script::SoftDeleteRestore { deleted: false }.apply(&mut d);
        assert_eq!(d["deleted"], false);
    }

    #[test]
    fn script_serializes_with_camel_case_tag() {
        let script = Script::RemoveLineageEdge {
            target_doc_id: "b".to_string(),
            direction: Some(LineageDirection::Upstream),
        };
        let value = serde_json::to_value(&script).unwrap();
        assert_eq!(
            value,
            json!({"script": "removeLineageEdge", "targetDocId": "b", "direction": "upstream"})
        );
        let back: Script = serde_json::from_value(value).unwrap();
        assert_eq!(back, script);
    }
}
