//! Value types mirrored into index documents.
//!
//! Everything here serializes to the camelCase JSON shape stored in the
//! index, so scripts can match on raw document fields (`inherited`,
//! `tagFQN`, `targetDocId`, ...) without a typed document schema.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{Document, INHERITED_FIELD};

// ── Entity identity ──────────────────────────────────────────────────

/// Identifies an entity of the primary store: its type, id and fully
/// qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHeader {
    pub entity_type: String,
    pub id: String,
    #[serde(rename = "fullyQualifiedName")]
    pub fqn: String,
}

impl EntityHeader {
    pub fn new(entity_type: &str, id: &str, fqn: &str) -> Self {
        EntityHeader {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            fqn: fqn.to_string(),
        }
    }
}

impl fmt::Display for EntityHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.fqn)
    }
}

/// A weak back-reference embedded in a document (the owner of an asset,
/// its domain, ...). The referenced entity is owned by the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(
        rename = "fullyQualifiedName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fqn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited: Option<bool>,
}

impl EntityReference {
    pub fn new(entity_type: &str, id: &str) -> Self {
        EntityReference {
            id: id.to_string(),
            entity_type: entity_type.to_string(),
            fqn: None,
            inherited: None,
        }
    }

    pub fn with_fqn(mut self, fqn: &str) -> Self {
        self.fqn = Some(fqn.to_string());
        self
    }

    /// Mark this reference as propagated from an ancestor.
    pub fn inherited(mut self) -> Self {
        self.inherited = Some(true);
        self
    }

    pub fn is_inherited(&self) -> bool {
        self.inherited == Some(true)
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        obj.insert("type".to_string(), Value::String(self.entity_type.clone()));
        if let Some(fqn) = &self.fqn {
            obj.insert("fullyQualifiedName".to_string(), Value::String(fqn.clone()));
        }
        if let Some(inherited) = self.inherited {
            obj.insert(INHERITED_FIELD.to_string(), Value::Bool(inherited));
        }
        Value::Object(obj)
    }

    /// Parse a reference out of a document value. Returns `None` if the value
    /// has no string `id`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = obj.get("id")?.as_str()?;
        Some(EntityReference {
            id: id.to_string(),
            entity_type: obj
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            fqn: obj
                .get("fullyQualifiedName")
                .and_then(Value::as_str)
                .map(str::to_string),
            inherited: obj.get(INHERITED_FIELD).and_then(Value::as_bool),
        })
    }
}

/// A classification or glossary tag applied to an entity, keyed by `tagFQN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLabel {
    #[serde(rename = "tagFQN")]
    pub tag_fqn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited: Option<bool>,
}

impl TagLabel {
    pub fn new(tag_fqn: &str) -> Self {
        TagLabel {
            tag_fqn: tag_fqn.to_string(),
            source: None,
            label_type: None,
            inherited: None,
        }
    }

    pub fn inherited(mut self) -> Self {
        self.inherited = Some(true);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("tagFQN".to_string(), Value::String(self.tag_fqn.clone()));
        if let Some(source) = &self.source {
            obj.insert("source".to_string(), Value::String(source.clone()));
        }
        if let Some(label_type) = &self.label_type {
            obj.insert("labelType".to_string(), Value::String(label_type.clone()));
        }
        if let Some(inherited) = self.inherited {
            obj.insert(INHERITED_FIELD.to_string(), Value::Bool(inherited));
        }
        Value::Object(obj)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(TagLabel {
            tag_fqn: obj.get("tagFQN")?.as_str()?.to_string(),
            source: obj.get("source").and_then(Value::as_str).map(str::to_string),
            label_type: obj
                .get("labelType")
                .and_then(Value::as_str)
                .map(str::to_string),
            inherited: obj.get(INHERITED_FIELD).and_then(Value::as_bool),
        })
    }
}

// ── Lineage ──────────────────────────────────────────────────────────

/// Which way a lineage edge points, seen from the document that stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageDirection {
    /// The target consumes data from this document's entity.
    Downstream,
    /// The target feeds data into this document's entity.
    Upstream,
}

impl LineageDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            LineageDirection::Downstream => "downstream",
            LineageDirection::Upstream => "upstream",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            LineageDirection::Downstream => LineageDirection::Upstream,
            LineageDirection::Upstream => LineageDirection::Downstream,
        }
    }
}

/// A directed relationship stored in the `lineage` array of its source
/// document. Unique by `(target_doc_id, direction)` within that array, so a
/// two-way cycle keeps both edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEdge {
    pub doc_id: String,
    pub target_doc_id: String,
    pub direction: LineageDirection,
    #[serde(flatten)]
    pub extra: Document,
}

impl LineageEdge {
    pub fn new(doc_id: &str, target_doc_id: &str, direction: LineageDirection) -> Self {
        LineageEdge {
            doc_id: doc_id.to_string(),
            target_doc_id: target_doc_id.to_string(),
            direction,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, extra: Document) -> Self {
        self.extra = extra;
        self
    }

    pub fn to_value(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("docId".to_string(), Value::String(self.doc_id.clone()));
        obj.insert(
            "targetDocId".to_string(),
            Value::String(self.target_doc_id.clone()),
        );
        obj.insert(
            "direction".to_string(),
            Value::String(self.direction.as_str().to_string()),
        );
        Value::Object(obj)
    }
}

// ── Test case results ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestCaseStatus {
    Success,
    Failed,
    Aborted,
    Queued,
}

impl TestCaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestCaseStatus::Success => "Success",
            TestCaseStatus::Failed => "Failed",
            TestCaseStatus::Aborted => "Aborted",
            TestCaseStatus::Queued => "Queued",
        }
    }
}

impl fmt::Display for TestCaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution result of a test case. Immutable once appended to history;
/// corrections are new records at a later or equal timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub id: String,
    #[serde(rename = "testCaseFQN")]
    pub test_case_fqn: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub test_case_status: TestCaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_result_value: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed_rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed_rows_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_rows_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bound: Option<f64>,
}

impl TestCaseResult {
    /// Build a stored record from an ingestion request.
    pub fn from_request(id: &str, test_case_fqn: &str, req: &CreateTestCaseResult) -> Self {
        TestCaseResult {
            id: id.to_string(),
            test_case_fqn: test_case_fqn.to_string(),
            timestamp: req.timestamp,
            test_case_status: req.test_case_status,
            result: req.result.clone(),
            sample_data: req.sample_data.clone(),
            test_result_value: req.test_result_value.clone(),
            passed_rows: req.passed_rows,
            failed_rows: req.failed_rows,
            passed_rows_percentage: req.passed_rows_percentage,
            failed_rows_percentage: req.failed_rows_percentage,
            incident_id: req.incident_id.clone(),
            max_bound: req.max_bound,
            min_bound: req.min_bound,
        }
    }

    /// Apply a correction, keeping identity and timestamp.
    pub fn patched(&self, patch: &TestCaseResultPatch) -> Self {
        let mut next = self.clone();
        if let Some(status) = patch.test_case_status {
            next.test_case_status = status;
        }
        if let Some(result) = &patch.result {
            next.result = Some(result.clone());
        }
        if let Some(sample) = &patch.sample_data {
            next.sample_data = Some(sample.clone());
        }
        if let Some(values) = &patch.test_result_value {
            next.test_result_value = values.clone();
        }
        if let Some(rows) = patch.passed_rows {
            next.passed_rows = Some(rows);
        }
        if let Some(rows) = patch.failed_rows {
            next.failed_rows = Some(rows);
        }
        if let Some(pct) = patch.passed_rows_percentage {
            next.passed_rows_percentage = Some(pct);
        }
        if let Some(pct) = patch.failed_rows_percentage {
            next.failed_rows_percentage = Some(pct);
        }
        if let Some(bound) = patch.max_bound {
            next.max_bound = Some(bound);
        }
        if let Some(bound) = patch.min_bound {
            next.min_bound = Some(bound);
        }
        next
    }

    pub fn pointer(&self) -> StatusPointer {
        StatusPointer {
            latest_result_id: self.id.clone(),
            status: self.test_case_status,
            timestamp: self.timestamp,
        }
    }
}

/// Ingestion request for a new test case result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestCaseResult {
    pub timestamp: i64,
    pub test_case_status: TestCaseStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub sample_data: Option<String>,
    #[serde(default)]
    pub test_result_value: Vec<Value>,
    #[serde(default)]
    pub passed_rows: Option<i64>,
    #[serde(default)]
    pub failed_rows: Option<i64>,
    #[serde(default)]
    pub passed_rows_percentage: Option<f64>,
    #[serde(default)]
    pub failed_rows_percentage: Option<f64>,
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub max_bound: Option<f64>,
    #[serde(default)]
    pub min_bound: Option<f64>,
}

impl CreateTestCaseResult {
    pub fn new(timestamp: i64, status: TestCaseStatus) -> Self {
        CreateTestCaseResult {
            timestamp,
            test_case_status: status,
            result: None,
            sample_data: None,
            test_result_value: Vec::new(),
            passed_rows: None,
            failed_rows: None,
            passed_rows_percentage: None,
            failed_rows_percentage: None,
            incident_id: None,
            max_bound: None,
            min_bound: None,
        }
    }
}

/// Partial correction of a stored result. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResultPatch {
    #[serde(default)]
    pub test_case_status: Option<TestCaseStatus>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub sample_data: Option<String>,
    #[serde(default)]
    pub test_result_value: Option<Vec<Value>>,
    #[serde(default)]
    pub passed_rows: Option<i64>,
    #[serde(default)]
    pub failed_rows: Option<i64>,
    #[serde(default)]
    pub passed_rows_percentage: Option<f64>,
    #[serde(default)]
    pub failed_rows_percentage: Option<f64>,
    #[serde(default)]
    pub max_bound: Option<f64>,
    #[serde(default)]
    pub min_bound: Option<f64>,
}

/// Cached reference from a parent entity to its most recent result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPointer {
    pub latest_result_id: String,
    pub status: TestCaseStatus,
    pub timestamp: i64,
}

impl StatusPointer {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "latestResultId": self.latest_result_id,
            "status": self.status.as_str(),
            "timestamp": self.timestamp,
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_reference_round_trips_through_document_shape() {
        let owner = EntityReference::new("user", "u-1")
            .with_fqn("alice")
            .inherited();
        let value = owner.to_value();
        assert_eq!(value["type"], "user");
        assert_eq!(value["inherited"], true);
        assert_eq!(EntityReference::from_value(&value), Some(owner));
    }

    #[test]
    fn lineage_edge_flattens_extra_metadata() {
        let mut extra = Map::new();
        extra.insert("pipeline".to_string(), Value::String("etl".to_string()));
        let edge = LineageEdge::new("a", "b", LineageDirection::Downstream).with_extra(extra);
        let value = edge.to_value();
        assert_eq!(value["targetDocId"], "b");
        assert_eq!(value["direction"], "downstream");
        assert_eq!(value["pipeline"], "etl");
        let parsed: LineageEdge = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, edge);
    }

    #[test]
    fn patch_keeps_identity_and_timestamp() {
        let req = CreateTestCaseResult::new(1_700_000_000_000, TestCaseStatus::Failed);
        let stored = TestCaseResult::from_request("r-1", "db.s.t.c", &req);
        let patch = TestCaseResultPatch {
            test_case_status: Some(TestCaseStatus::Success),
            result: Some("fixed".to_string()),
            ..Default::default()
        };
        let next = stored.patched(&patch);
        assert_eq!(next.id, "r-1");
        assert_eq!(next.timestamp, 1_700_000_000_000);
        assert_eq!(next.test_case_status, TestCaseStatus::Success);
        assert_eq!(next.result.as_deref(), Some("fixed"));
    }

    #[test]
    fn status_pointer_uses_camel_case_keys() {
        let ptr = StatusPointer {
            latest_result_id: "r-9".to_string(),
            status: TestCaseStatus::Success,
            timestamp: 100,
        };
        let value = ptr.to_value();
        assert_eq!(value["latestResultId"], "r-9");
        assert_eq!(value["status"], "Success");
        assert_eq!(StatusPointer::from_value(&value), Some(ptr));
    }
}
