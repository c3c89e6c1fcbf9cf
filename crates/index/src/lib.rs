//! searchsync-index: the contract between the synchronization engine and a
//! search index backend.
//!
//! - [`SearchBackend`] -- index lifecycle, aliases, scripted partial updates,
//!   update/delete-by-query, bulk, search and terms aggregation
//! - [`MemoryBackend`] -- a complete in-memory implementation
//! - [`conformance`] -- a backend-agnostic test suite

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::IndexError;
pub use memory::MemoryBackend;
pub use record::{
    mapping_conflicts, term_key, BulkItemResult, BulkOperation, BulkResponse, ByQueryResponse,
    Hit, IndexDefinition, SearchPage, SearchRequest, SortOrder, SortSpec, TermsBucket,
    TermsRequest, WriteOutcome,
};
pub use traits::SearchBackend;
