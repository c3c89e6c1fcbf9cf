//! searchsync-engine: keeps a search index in step with a primary store.
//!
//! Writes land in the [`PrimaryStore`] first. The committed change is routed
//! by the core router and handed to a bounded single-worker queue that
//! applies the resulting partial updates to a [`SearchBackend`] in order.
//!
//! # Public API
//!
//! - [`SyncEngine`] -- entity lifecycle, membership, lineage and direct index writes
//! - [`ResultService`] -- test case result ingestion with the status rollup
//! - [`SearchService`] -- listing, field search, aggregation and lineage reads
//! - [`IndexAdmin`] -- idempotent index and alias lifecycle
//! - [`SyncQueue`] -- the propagation queue itself
//! - [`EngineConfig`] -- queue bound and index catalogue
//!
//! [`SearchBackend`]: searchsync_index::SearchBackend

pub mod admin;
pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod primary;
pub mod read;
pub mod results;

// ── Convenience re-exports ───────────────────────────────────────────

pub use admin::{CreateOutcome, IndexAdmin};
pub use config::{EngineConfig, HierarchyRule, IndexMapping};
pub use engine::SyncEngine;
pub use error::{PrimaryStoreError, SyncError};
pub use executor::{Operation, QueueStats, SyncQueue};
pub use primary::{EntityRecord, Include, MemoryPrimaryStore, PrimaryStore};
pub use read::{GraphEdge, LineageGraph, LineageRequest, SearchService};
pub use results::ResultService;
