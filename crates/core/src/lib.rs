//! searchsync-core: pure index-synchronization logic.
//!
//! Translates primary-store mutations into targeted partial updates against a
//! denormalized search index. Nothing in this crate performs I/O: the router,
//! the script catalogue and the status rollup are plain functions over values,
//! so they can be exercised without any index backend.
//!
//! # Public API
//!
//! - [`Router`] -- turn a [`Change`] into a list of [`PropagationTarget`]s
//! - [`Script`] -- closed catalogue of idempotent partial-update recipes
//! - [`Selector`] -- which documents of an index a target applies to
//! - [`RollupState`] -- "latest wins" status pointer for time-series children
//! - Model types: [`EntityReference`], [`TagLabel`], [`LineageEdge`],
//!   [`TestCaseResult`], [`StatusPointer`]

pub mod document;
pub mod error;
pub mod model;
pub mod rollup;
pub mod route;
pub mod script;
pub mod validate;

// ── Convenience re-exports ───────────────────────────────────────────

pub use document::{Document, Selector};
pub use error::{RouteError, ValidationError};
pub use model::{
    CreateTestCaseResult, EntityHeader, EntityReference, LineageDirection, LineageEdge,
    StatusPointer, TagLabel, TestCaseResult, TestCaseResultPatch, TestCaseStatus,
};
pub use rollup::{ResultOperation, RollupState, Transition};
pub use route::{
    Change, ChildScope, EmbeddedReference, FieldChange, PropagationTarget, ReferenceKey, Router,
    RoutingTable, TargetAction,
};
pub use script::Script;
