use serde::{Deserialize, Serialize};
use serde_json::Value;

use searchsync_core::{Document, Script, Selector};

/// An index definition: its name, field mapping and aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    #[serde(default)]
    pub mapping: Document,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl IndexDefinition {
    pub fn new(name: &str) -> Self {
        IndexDefinition {
            name: name.to_string(),
            mapping: Document::new(),
            aliases: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: Document) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        if !self.aliases.iter().any(|a| a == alias) {
            self.aliases.push(alias.to_string());
        }
        self
    }
}

/// Fields declared in both mappings with different definitions.
/// Fields present on only one side are not conflicts.
pub fn mapping_conflicts(existing: &Document, requested: &Document) -> Vec<String> {
    requested
        .iter()
        .filter(|(field, def)| existing.get(*field).is_some_and(|cur| cur != *def))
        .map(|(field, _)| field.clone())
        .collect()
}

/// What a single-document write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    Created,
    Updated,
    /// The script left the document unchanged.
    Noop,
    /// The addressed document does not exist; nothing was written.
    Missing,
    Deleted,
}

/// Counts reported by update-by-query and delete-by-query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByQueryResponse {
    pub matched: usize,
    pub changed: usize,
}

/// One entry of a bulk request. Bulk entries always address a single
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BulkOperation {
    Index {
        index: String,
        id: String,
        document: Document,
    },
    Update {
        index: String,
        id: String,
        script: Script,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkOperation {
    pub fn index_name(&self) -> &str {
        match self {
            BulkOperation::Index { index, .. }
            | BulkOperation::Update { index, .. }
            | BulkOperation::Delete { index, .. } => index,
        }
    }

    pub fn doc_id(&self) -> &str {
        match self {
            BulkOperation::Index { id, .. }
            | BulkOperation::Update { id, .. }
            | BulkOperation::Delete { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: String,
    pub id: String,
    pub outcome: Option<WriteOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.error.is_some())
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// A filtered, paged query against an index or alias.
///
/// `filters` are ANDed. `query` is a free-text match over string fields;
/// `None`, `""` and `"*"` match everything. Soft-deleted documents are
/// excluded unless `include_deleted` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub index: String,
    #[serde(default)]
    pub filters: Vec<Selector>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_size() -> usize {
    10
}

impl SearchRequest {
    pub fn new(index: &str) -> Self {
        SearchRequest {
            index: index.to_string(),
            filters: Vec::new(),
            query: None,
            include_deleted: false,
            sort: None,
            from: 0,
            size: default_size(),
        }
    }

    pub fn filter(mut self, selector: Selector) -> Self {
        self.filters.push(selector);
        self
    }

    pub fn query(mut self, text: &str) -> Self {
        self.query = Some(text.to_string());
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub index: String,
    pub id: String,
    pub source: Document,
}

/// One page of hits plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub total: usize,
    pub hits: Vec<Hit>,
}

/// Terms aggregation: bucket the documents matched by `search` on the
/// values found at `field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsRequest {
    pub search: SearchRequest,
    pub field: String,
    #[serde(default = "default_size")]
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsBucket {
    pub key: String,
    pub doc_count: usize,
}

/// Render a scalar document value as an aggregation key.
pub fn term_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn added_fields_are_not_conflicts() {
        let existing = mapping(json!({"name": {"type": "text"}}));
        let requested = mapping(json!({"name": {"type": "text"}, "owners": {"type": "nested"}}));
        assert!(mapping_conflicts(&existing, &requested).is_empty());
    }

    #[test]
    fn changed_field_type_is_a_conflict() {
        let existing = mapping(json!({"name": {"type": "text"}}));
        let requested = mapping(json!({"name": {"type": "keyword"}}));
        assert_eq!(mapping_conflicts(&existing, &requested), vec!["name".to_string()]);
    }

    #[test]
    fn search_request_defaults_from_json() {
        let req: SearchRequest = serde_json::from_value(json!({"index": "table_idx"})).unwrap();
        assert_eq!(req.size, 10);
        assert!(!req.include_deleted);
    }
}
