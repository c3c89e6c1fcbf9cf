//! Index documents and the selectors that address them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An indexed document: the flat field map mirroring an entity's searchable
/// projection.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const FQN_FIELD: &str = "fullyQualifiedName";
pub const ENTITY_TYPE_FIELD: &str = "entityType";
pub const DELETED_FIELD: &str = "deleted";
pub const INHERITED_FIELD: &str = "inherited";
pub const LINEAGE_FIELD: &str = "lineage";
pub const OWNERS_FIELD: &str = "owners";
pub const DOMAIN_FIELD: &str = "domain";
pub const TAGS_FIELD: &str = "tags";
pub const TEST_SUITES_FIELD: &str = "testSuites";

/// Collect every value reachable at a dotted path. Arrays along the way are
/// flattened, so `tags.tagFQN` yields the key of every tag.
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        _ => match segments.split_first() {
            None => out.push(value),
            Some((head, rest)) => {
                if let Some(next) = value.as_object().and_then(|obj| obj.get(*head)) {
                    collect(next, rest, out);
                }
            }
        },
    }
}

/// Compare a scalar document value against its string form. Numbers and
/// booleans compare by their JSON rendering.
pub fn scalar_eq(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

/// `true` when the value carries `inherited: true`. A list counts as
/// inherited when its first entry does.
pub fn is_inherited(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.get(INHERITED_FIELD).and_then(Value::as_bool) == Some(true),
        Value::Array(items) => items.first().is_some_and(is_inherited),
        _ => false,
    }
}

/// `true` for a missing-equivalent value: null or an empty list.
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Stamp `inherited: true` onto an object, or onto every object of a list.
/// Scalars carry no marker and are returned unchanged.
pub fn mark_inherited(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut obj = obj.clone();
            obj.insert(INHERITED_FIELD.to_string(), Value::Bool(true));
            Value::Object(obj)
        }
        Value::Array(items) => Value::Array(items.iter().map(mark_inherited).collect()),
        other => other.clone(),
    }
}

/// The `id` recorded on a reference value (first entry for lists).
pub fn reference_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(obj) => obj.get(ID_FIELD).and_then(Value::as_str),
        Value::Array(items) => items.first().and_then(reference_id),
        _ => None,
    }
}

pub fn is_deleted(doc: &Document) -> bool {
    match doc.get(DELETED_FIELD) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Which documents of an index an operation addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum Selector {
    /// Exactly one document, by id.
    Id { id: String },
    /// Every document with a value at `field` equal to `value`.
    #[serde(rename_all = "camelCase")]
    FieldEquals { field: String, value: String },
    /// Every document whose fully qualified name starts with `prefix`.
    FqnPrefix { prefix: String },
    /// Every document in the index.
    All,
}

impl Selector {
    pub fn id(id: &str) -> Self {
        Selector::Id { id: id.to_string() }
    }

    pub fn field(field: &str, value: &str) -> Self {
        Selector::FieldEquals {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn fqn_prefix(prefix: &str) -> Self {
        Selector::FqnPrefix {
            prefix: prefix.to_string(),
        }
    }

    pub fn matches(&self, doc_id: &str, doc: &Document) -> bool {
        match self {
            Selector::Id { id } => id == doc_id,
            Selector::FieldEquals { field, value } => values_at(doc, field)
                .into_iter()
                .any(|v| scalar_eq(v, value)),
            Selector::FqnPrefix { prefix } => doc
                .get(FQN_FIELD)
                .and_then(Value::as_str)
                .is_some_and(|fqn| fqn.starts_with(prefix.as_str())),
            Selector::All => true,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Selector::Id { id } => Some(id),
            _ => None,
        }
    }
}

/// Build a document from `(key, value)` pairs.
pub fn document_from<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let mut doc = Map::new();
    for (k, v) in pairs {
        doc.insert(k.into(), v);
    }
    doc
}
