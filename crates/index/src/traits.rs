use async_trait::async_trait;

use searchsync_core::{Document, Script, Selector};

use crate::error::IndexError;
use crate::record::{
    BulkOperation, BulkResponse, ByQueryResponse, IndexDefinition, SearchPage, SearchRequest,
    TermsBucket, TermsRequest, WriteOutcome,
};

/// The contract the synchronization engine imposes on a search index.
///
/// A `SearchBackend` stores documents in named indices, resolves aliases to
/// the indices behind them, and applies partial updates expressed as
/// [`Script`]s. Replication, sharding and query execution are the backend's
/// own business.
///
/// ## Names
///
/// Single-document writes take a concrete index name. Reads,
/// update-by-query and delete-by-query also accept an alias, in which case
/// they fan out over every index the alias points to.
///
/// ## Missing documents
///
/// Updating a document that does not exist is not an error: the backend
/// returns [`WriteOutcome::Missing`] and writes nothing. A missing *index*
/// is an error ([`IndexError::IndexNotFound`]).
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// between the engine and its background worker.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    // ── Index lifecycle ──────────────────────────────────────────────────────

    async fn index_exists(&self, index: &str) -> Result<bool, IndexError>;

    /// Create an index with its mapping and aliases.
    ///
    /// Fails with `IndexError::Backend` if the index already exists;
    /// idempotency is the administrator's job.
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), IndexError>;

    async fn get_mapping(&self, index: &str) -> Result<Document, IndexError>;

    /// Merge `mapping` into the index's mapping. Existing fields are
    /// overwritten with the given definitions.
    async fn put_mapping(&self, index: &str, mapping: &Document) -> Result<(), IndexError>;

    /// Delete an index and every alias entry pointing to it.
    async fn delete_index(&self, index: &str) -> Result<(), IndexError>;

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError>;

    // ── Aliases ──────────────────────────────────────────────────────────────

    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), IndexError>;

    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), IndexError>;

    /// Aliases currently pointing at `index`, sorted.
    async fn get_aliases(&self, index: &str) -> Result<Vec<String>, IndexError>;

    // ── Documents ────────────────────────────────────────────────────────────

    /// Fetch a document by id. With an alias, the first index (by name)
    /// holding the id wins.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, IndexError>;

    /// Create or replace a whole document.
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: Document,
    ) -> Result<WriteOutcome, IndexError>;

    /// Apply a script to one document.
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        script: &Script,
    ) -> Result<WriteOutcome, IndexError>;

    /// Apply a script to every document the selector matches.
    async fn update_by_query(
        &self,
        index: &str,
        selector: &Selector,
        script: &Script,
    ) -> Result<ByQueryResponse, IndexError>;

    async fn delete_document(&self, index: &str, id: &str) -> Result<WriteOutcome, IndexError>;

    async fn delete_by_query(
        &self,
        index: &str,
        selector: &Selector,
    ) -> Result<ByQueryResponse, IndexError>;

    /// Apply several single-document operations in one request. Per-item
    /// failures are reported in the response, not as an `Err`.
    ///
    /// The default declines with `IndexError::NotImplemented`; callers fall
    /// back to issuing the operations one by one.
    async fn bulk(&self, operations: Vec<BulkOperation>) -> Result<BulkResponse, IndexError> {
        let _ = operations;
        Err(IndexError::not_implemented("bulk"))
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, IndexError>;

    /// Terms aggregation, buckets ordered by count descending then key.
    async fn terms(&self, request: &TermsRequest) -> Result<Vec<TermsBucket>, IndexError>;
}
