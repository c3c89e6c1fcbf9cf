use searchsync_core::{RouteError, ValidationError};
use searchsync_index::IndexError;

/// Errors returned by a PrimaryStore implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimaryStoreError {
    /// No entity with the given type and id (or name) is visible.
    #[error("entity not found: {entity_type} {key}")]
    EntityNotFound { entity_type: String, key: String },

    /// No time-series result exists at the given timestamp.
    #[error("no test case result for {test_case_fqn} at {timestamp}")]
    ResultNotFound { test_case_fqn: String, timestamp: i64 },

    /// Any other store failure. Aborts the whole operation.
    #[error("primary store error: {0}")]
    Backend(String),
}

impl PrimaryStoreError {
    pub fn entity_not_found(entity_type: &str, key: &str) -> Self {
        PrimaryStoreError::EntityNotFound {
            entity_type: entity_type.to_string(),
            key: key.to_string(),
        }
    }
}

/// All errors surfaced by the synchronization engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A referenced entity, result, index or document is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The index backend cannot be reached.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The index backend variant does not support the operation.
    #[error("not implemented by the index backend: {0}")]
    NotImplemented(String),

    #[error("propagation queue is closed")]
    QueueClosed,

    #[error("propagation queue is full")]
    QueueFull,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Index(IndexError),

    #[error(transparent)]
    Primary(PrimaryStoreError),
}

impl SyncError {
    /// Maps to a 404-equivalent for callers.
    pub fn is_user_visible_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Maps to "service unavailable" on index-only read paths.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SyncError::IndexUnavailable(_))
    }
}

impl From<IndexError> for SyncError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(msg) => SyncError::IndexUnavailable(msg),
            IndexError::NotImplemented { operation } => SyncError::NotImplemented(operation),
            IndexError::IndexNotFound { index } => SyncError::NotFound(format!("index {index}")),
            other => SyncError::Index(other),
        }
    }
}

impl From<PrimaryStoreError> for SyncError {
    fn from(err: PrimaryStoreError) -> Self {
        match err {
            PrimaryStoreError::Backend(_) => SyncError::Primary(err),
            not_found => SyncError::NotFound(not_found.to_string()),
        }
    }
}
