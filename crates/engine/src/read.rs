//! Read path: listing, field search, aggregation and lineage traversal.
//!
//! Everything here reads the index only and may lag the primary store by
//! the depth of the propagation queue.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use searchsync_core::document::{is_deleted, FQN_FIELD, LINEAGE_FIELD};
use searchsync_core::{Document, LineageDirection, LineageEdge, RoutingTable, Selector};
use searchsync_index::{SearchBackend, SearchPage, SearchRequest, TermsBucket, TermsRequest};

use crate::error::SyncError;
use crate::results::{STATUS_FIELD, TEST_CASE_TYPE};

/// Upper bound on buckets scanned before an aggregation's value filter.
const AGGREGATION_SCAN: usize = 10_000;

/// Field on test case documents naming the entity under test.
pub const ENTITY_FQN_FIELD: &str = "entityFQN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageRequest {
    pub fqn: String,
    #[serde(default)]
    pub upstream_depth: usize,
    #[serde(default)]
    pub downstream_depth: usize,
    /// Nodes other than the root must match every filter.
    #[serde(default)]
    pub filters: Vec<Selector>,
    #[serde(default)]
    pub include_deleted: bool,
    /// Restrict the root lookup to this entity type's index.
    #[serde(default)]
    pub entity_type: Option<String>,
}

impl LineageRequest {
    pub fn new(fqn: &str, upstream_depth: usize, downstream_depth: usize) -> Self {
        LineageRequest {
            fqn: fqn.to_string(),
            upstream_depth,
            downstream_depth,
            filters: Vec::new(),
            include_deleted: false,
            entity_type: None,
        }
    }
}

/// A data-flow edge, always oriented producer to consumer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from_id: String,
    pub to_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    pub root: Document,
    /// Every node reached, excluding the root, ordered by id.
    pub nodes: Vec<Document>,
    pub edges: Vec<GraphEdge>,
}

impl LineageGraph {
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().filter_map(doc_id).collect()
    }
}

fn doc_id(doc: &Document) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}

pub struct SearchService {
    backend: Arc<dyn SearchBackend>,
    table: RoutingTable,
}

impl SearchService {
    pub fn new(backend: Arc<dyn SearchBackend>, table: RoutingTable) -> Self {
        SearchService { backend, table }
    }

    /// Offset listing with filters, free-text query and sort.
    pub async fn list(&self, request: &SearchRequest) -> Result<SearchPage, SyncError> {
        Ok(self.backend.search(request).await?)
    }

    pub async fn search_by_field(
        &self,
        index: &str,
        field: &str,
        value: &str,
    ) -> Result<SearchPage, SyncError> {
        let request = SearchRequest::new(index).filter(Selector::field(field, value));
        self.list(&request).await
    }

    /// The first document under the global alias whose `sourceUrl` matches.
    pub async fn search_by_source_url(&self, url: &str) -> Result<Option<Document>, SyncError> {
        let request = SearchRequest::new(self.table.global_alias())
            .filter(Selector::field("sourceUrl", url))
            .page(0, 1);
        let page = self.list(&request).await?;
        Ok(page.hits.into_iter().next().map(|hit| hit.source))
    }

    pub async fn get_document(&self, index: &str, id: &str) -> Result<Document, SyncError> {
        self.backend
            .get_document(index, id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("document {id} in {index}")))
    }

    /// Bucket counts of `field` over the documents matching `query`, keeping
    /// keys that contain `value` (case-insensitive; empty keeps all).
    pub async fn aggregate(
        &self,
        index: &str,
        field: &str,
        value: &str,
        query: Option<&str>,
        size: usize,
    ) -> Result<Vec<TermsBucket>, SyncError> {
        let mut search = SearchRequest::new(index);
        if let Some(q) = query {
            search = search.query(q);
        }
        let request = TermsRequest {
            search,
            field: field.to_string(),
            size: AGGREGATION_SCAN,
        };
        let needle = value.to_lowercase();
        let mut buckets = self.backend.terms(&request).await?;
        buckets.retain(|b| b.key.to_lowercase().contains(&needle));
        buckets.truncate(size);
        Ok(buckets)
    }

    // ── Lineage ──────────────────────────────────────────────────────────────

    async fn find_root(&self, request: &LineageRequest) -> Result<Document, SyncError> {
        let index = match &request.entity_type {
            Some(entity_type) => self.table.index_for(entity_type)?,
            None => self.table.global_alias(),
        };
        let search = SearchRequest::new(index)
            .filter(Selector::field(FQN_FIELD, &request.fqn))
            .include_deleted(true)
            .page(0, 1);
        let page = self.backend.search(&search).await?;
        page.hits
            .into_iter()
            .next()
            .map(|hit| hit.source)
            .ok_or_else(|| SyncError::NotFound(format!("entity {}", request.fqn)))
    }

    /// Breadth-first walk of the lineage arrays, bounded per direction.
    /// Nodes that are soft-deleted (unless requested) or fail a filter are
    /// neither returned nor walked through.
    pub async fn lineage(&self, request: &LineageRequest) -> Result<LineageGraph, SyncError> {
        let root = self.find_root(request).await?;
        let root_id = doc_id(&root)
            .ok_or_else(|| SyncError::NotFound(format!("entity {}", request.fqn)))?
            .to_string();

        let mut nodes: BTreeMap<String, Document> = BTreeMap::new();
        let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();
        let walks = [
            (LineageDirection::Upstream, request.upstream_depth),
            (LineageDirection::Downstream, request.downstream_depth),
        ];
        for (direction, depth) in walks {
            let mut seen: HashSet<String> = HashSet::from([root_id.clone()]);
            let mut frontier = vec![(root_id.clone(), root.clone())];
            for _ in 0..depth {
                let mut next = Vec::new();
                for (id, doc) in &frontier {
                    for edge in lineage_edges(doc).filter(|e| e.direction == direction) {
                        let target = edge.target_doc_id;
                        let Some(node) = self.lineage_node(&target, request).await? else {
                            continue;
                        };
                        edges.insert(match direction {
                            LineageDirection::Upstream => GraphEdge {
                                from_id: target.clone(),
                                to_id: id.clone(),
                            },
                            LineageDirection::Downstream => GraphEdge {
                                from_id: id.clone(),
                                to_id: target.clone(),
                            },
                        });
                        if seen.insert(target.clone()) {
                            nodes.insert(target.clone(), node.clone());
                            next.push((target, node));
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }
        nodes.remove(&root_id);
        tracing::debug!(
            fqn = %request.fqn,
            nodes = nodes.len(),
            edges = edges.len(),
            "lineage resolved"
        );
        Ok(LineageGraph {
            root,
            nodes: nodes.into_values().collect(),
            edges: edges.into_iter().collect(),
        })
    }

    async fn lineage_node(
        &self,
        id: &str,
        request: &LineageRequest,
    ) -> Result<Option<Document>, SyncError> {
        let Some(doc) = self
            .backend
            .get_document(self.table.global_alias(), id)
            .await?
        else {
            return Ok(None);
        };
        if !request.include_deleted && is_deleted(&doc) {
            return Ok(None);
        }
        if !request.filters.iter().all(|f| f.matches(id, &doc)) {
            return Ok(None);
        }
        Ok(Some(doc))
    }

    /// Upstream lineage narrowed to the root plus nodes with a failing test
    /// case. Edges survive only between kept nodes.
    pub async fn data_quality_lineage(
        &self,
        fqn: &str,
        upstream_depth: usize,
        filters: Vec<Selector>,
        include_deleted: bool,
    ) -> Result<LineageGraph, SyncError> {
        let request = LineageRequest {
            filters,
            include_deleted,
            ..LineageRequest::new(fqn, upstream_depth, 0)
        };
        let mut graph = self.lineage(&request).await?;
        let mut kept_nodes = Vec::new();
        for node in graph.nodes {
            let failing = match node.get(FQN_FIELD).and_then(Value::as_str) {
                Some(node_fqn) => self.has_test_case_failure(node_fqn).await?,
                None => false,
            };
            if failing {
                kept_nodes.push(node);
            }
        }
        let mut kept: HashSet<String> = kept_nodes
            .iter()
            .filter_map(doc_id)
            .map(str::to_string)
            .collect();
        if let Some(root_id) = doc_id(&graph.root) {
            kept.insert(root_id.to_string());
        }
        graph
            .edges
            .retain(|e| kept.contains(&e.from_id) && kept.contains(&e.to_id));
        graph.nodes = kept_nodes;
        Ok(graph)
    }

    /// Whether any live test case of the entity currently reports `Failed`.
    pub async fn has_test_case_failure(&self, entity_fqn: &str) -> Result<bool, SyncError> {
        let index = self.table.index_for(TEST_CASE_TYPE)?;
        let request = SearchRequest::new(index)
            .filter(Selector::field(ENTITY_FQN_FIELD, entity_fqn))
            .filter(Selector::field(STATUS_FIELD, "Failed"))
            .page(0, 1);
        Ok(self.backend.search(&request).await?.total > 0)
    }
}

fn lineage_edges(doc: &Document) -> impl Iterator<Item = LineageEdge> + '_ {
    doc.get(LINEAGE_FIELD)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
}
