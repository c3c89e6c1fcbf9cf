//! In-memory [`SearchBackend`].
//!
//! Holds every index in a `BTreeMap` behind a tokio `RwLock`. Used by the
//! engine tests, the CLI's replay command and the conformance suite. The
//! backend can be switched offline to exercise `Unavailable` handling, and
//! built without bulk support to exercise the one-by-one fallback.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use searchsync_core::document::{is_deleted, values_at};
use searchsync_core::{Document, Script, Selector};

use crate::error::IndexError;
use crate::record::{
    term_key, BulkItemResult, BulkOperation, BulkResponse, ByQueryResponse, Hit, IndexDefinition,
    SearchPage, SearchRequest, SortOrder, TermsBucket, TermsRequest, WriteOutcome,
};
use crate::traits::SearchBackend;

#[derive(Debug, Default)]
struct StoredIndex {
    mapping: Document,
    docs: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct State {
    indexes: BTreeMap<String, StoredIndex>,
    /// alias -> indices it points to
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl State {
    fn resolve(&self, name: &str) -> Result<Vec<String>, IndexError> {
        if self.indexes.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        match self.aliases.get(name) {
            Some(targets) if !targets.is_empty() => Ok(targets.iter().cloned().collect()),
            _ => Err(IndexError::not_found(name)),
        }
    }

    fn index(&self, name: &str) -> Result<&StoredIndex, IndexError> {
        self.indexes
            .get(name)
            .ok_or_else(|| IndexError::not_found(name))
    }

    fn index_mut(&mut self, name: &str) -> Result<&mut StoredIndex, IndexError> {
        self.indexes
            .get_mut(name)
            .ok_or_else(|| IndexError::not_found(name))
    }

    fn write(&mut self, op: &BulkOperation) -> Result<WriteOutcome, IndexError> {
        let stored = self.index_mut(op.index_name())?;
        Ok(match op {
            BulkOperation::Index { id, document, .. } => {
                match stored.docs.insert(id.clone(), document.clone()) {
                    Some(_) => WriteOutcome::Updated,
                    None => WriteOutcome::Created,
                }
            }
            BulkOperation::Update { id, script, .. } => match stored.docs.get_mut(id) {
                None => WriteOutcome::Missing,
                Some(doc) => {
                    if script.apply(doc) {
                        WriteOutcome::Updated
                    } else {
                        WriteOutcome::Noop
                    }
                }
            },
            BulkOperation::Delete { id, .. } => match stored.docs.remove(id) {
                Some(_) => WriteOutcome::Deleted,
                None => WriteOutcome::Missing,
            },
        })
    }

    fn matching(&self, request: &SearchRequest) -> Result<Vec<Hit>, IndexError> {
        let needle = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty() && *q != "*")
            .map(str::to_lowercase);
        let mut hits = Vec::new();
        for name in self.resolve(&request.index)? {
            let stored = self.index(&name)?;
            for (id, doc) in &stored.docs {
                if !request.include_deleted && is_deleted(doc) {
                    continue;
                }
                if !request.filters.iter().all(|f| f.matches(id, doc)) {
                    continue;
                }
                if let Some(needle) = &needle {
                    if !doc.values().any(|v| contains_text(v, needle)) {
                        continue;
                    }
                }
                hits.push(Hit {
                    index: name.clone(),
                    id: id.clone(),
                    source: doc.clone(),
                });
            }
        }
        Ok(hits)
    }
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| contains_text(v, needle)),
        Value::Object(obj) => obj.values().any(|v| contains_text(v, needle)),
        _ => false,
    }
}

/// Missing values sort last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Greater,
        (Some(_), None) => CmpOrdering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(x), Some(y)) => term_key(x).cmp(&term_key(y)),
    }
}

pub struct MemoryBackend {
    state: RwLock<State>,
    available: AtomicBool,
    bulk_enabled: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
            bulk_enabled: true,
        }
    }

    /// A backend whose `bulk` declines with `NotImplemented`.
    pub fn without_bulk() -> Self {
        MemoryBackend {
            bulk_enabled: false,
            ..Self::new()
        }
    }

    /// Simulate the backend going offline (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable("in-memory backend is offline".into()))
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        self.check()?;
        Ok(self.state.read().await.indexes.contains_key(index))
    }

    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.indexes.contains_key(&definition.name) {
            return Err(IndexError::Backend(format!(
                "index already exists: {}",
                definition.name
            )));
        }
        state.indexes.insert(
            definition.name.clone(),
            StoredIndex {
                mapping: definition.mapping.clone(),
                docs: BTreeMap::new(),
            },
        );
        for alias in &definition.aliases {
            state
                .aliases
                .entry(alias.clone())
                .or_default()
                .insert(definition.name.clone());
        }
        tracing::debug!(index = %definition.name, "created index");
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Document, IndexError> {
        self.check()?;
        Ok(self.state.read().await.index(index)?.mapping.clone())
    }

    async fn put_mapping(&self, index: &str, mapping: &Document) -> Result<(), IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state.index_mut(index)?;
        for (field, def) in mapping {
            stored.mapping.insert(field.clone(), def.clone());
        }
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.indexes.remove(index).is_none() {
            return Err(IndexError::not_found(index));
        }
        for targets in state.aliases.values_mut() {
            targets.remove(index);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        tracing::debug!(index, "deleted index");
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        self.check()?;
        Ok(self.state.read().await.indexes.keys().cloned().collect())
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.index(index)?;
        state
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
        Ok(())
    }

    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.index(index)?;
        if let Some(targets) = state.aliases.get_mut(alias) {
            targets.remove(index);
            if targets.is_empty() {
                state.aliases.remove(alias);
            }
        }
        Ok(())
    }

    async fn get_aliases(&self, index: &str) -> Result<Vec<String>, IndexError> {
        self.check()?;
        let state = self.state.read().await;
        state.index(index)?;
        Ok(state
            .aliases
            .iter()
            .filter(|(_, targets)| targets.contains(index))
            .map(|(alias, _)| alias.clone())
            .collect())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, IndexError> {
        self.check()?;
        let state = self.state.read().await;
        for name in state.resolve(index)? {
            if let Some(doc) = state.index(&name)?.docs.get(id) {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: Document,
    ) -> Result<WriteOutcome, IndexError> {
        self.check()?;
        let op = BulkOperation::Index {
            index: index.to_string(),
            id: id.to_string(),
            document,
        };
        self.state.write().await.write(&op)
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        script: &Script,
    ) -> Result<WriteOutcome, IndexError> {
        self.check()?;
        let op = BulkOperation::Update {
            index: index.to_string(),
            id: id.to_string(),
            script: script.clone(),
        };
        self.state.write().await.write(&op)
    }

    async fn update_by_query(
        &self,
        index: &str,
        selector: &Selector,
        script: &Script,
    ) -> Result<ByQueryResponse, IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        let mut response = ByQueryResponse::default();
        for name in state.resolve(index)? {
            let stored = state.index_mut(&name)?;
            for (id, doc) in stored.docs.iter_mut() {
                if !selector.matches(id, doc) {
                    continue;
                }
                response.matched += 1;
                if script.apply(doc) {
                    response.changed += 1;
                }
            }
        }
        Ok(response)
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<WriteOutcome, IndexError> {
        self.check()?;
        let op = BulkOperation::Delete {
            index: index.to_string(),
            id: id.to_string(),
        };
        self.state.write().await.write(&op)
    }

    async fn delete_by_query(
        &self,
        index: &str,
        selector: &Selector,
    ) -> Result<ByQueryResponse, IndexError> {
        self.check()?;
        let mut state = self.state.write().await;
        let mut response = ByQueryResponse::default();
        for name in state.resolve(index)? {
            let stored = state.index_mut(&name)?;
            let before = stored.docs.len();
            stored.docs.retain(|id, doc| !selector.matches(id, doc));
            let removed = before - stored.docs.len();
            response.matched += removed;
            response.changed += removed;
        }
        Ok(response)
    }

    async fn bulk(&self, operations: Vec<BulkOperation>) -> Result<BulkResponse, IndexError> {
        if !self.bulk_enabled {
            return Err(IndexError::not_implemented("bulk"));
        }
        self.check()?;
        let mut state = self.state.write().await;
        let items = operations
            .iter()
            .map(|op| {
                let (outcome, error) = match state.write(op) {
                    Ok(outcome) => (Some(outcome), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                BulkItemResult {
                    index: op.index_name().to_string(),
                    id: op.doc_id().to_string(),
                    outcome,
                    error,
                }
            })
            .collect();
        Ok(BulkResponse { items })
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, IndexError> {
        self.check()?;
        let mut hits = self.state.read().await.matching(request)?;
        if let Some(sort) = &request.sort {
            hits.sort_by(|a, b| {
                let ord = compare_values(
                    values_at(&a.source, &sort.field).first().copied(),
                    values_at(&b.source, &sort.field).first().copied(),
                );
                match sort.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }
        let total = hits.len();
        let hits = hits
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect();
        Ok(SearchPage { total, hits })
    }

    async fn terms(&self, request: &TermsRequest) -> Result<Vec<TermsBucket>, IndexError> {
        self.check()?;
        let hits = self.state.read().await.matching(&request.search)?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for hit in &hits {
            let keys: BTreeSet<String> = values_at(&hit.source, &request.field)
                .into_iter()
                .filter_map(term_key)
                .collect();
            for key in keys {
                *counts.entry(key).or_default() += 1;
            }
        }
        let mut buckets: Vec<TermsBucket> = counts
            .into_iter()
            .map(|(key, doc_count)| TermsBucket { key, doc_count })
            .collect();
        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(request.size);
        Ok(buckets)
    }
}
