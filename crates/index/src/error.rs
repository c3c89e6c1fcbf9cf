/// All errors that can be returned by a SearchBackend implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// No index or alias with the given name exists.
    #[error("index not found: {index}")]
    IndexNotFound { index: String },

    /// The backend cannot be reached. Queued writes that hit this are
    /// dropped after logging; reads surface it as "service unavailable".
    #[error("index backend unavailable: {0}")]
    Unavailable(String),

    /// The backend variant does not support this operation.
    #[error("operation not implemented by this index backend: {operation}")]
    NotImplemented { operation: String },

    /// A requested mapping disagrees with the existing one on a field.
    #[error("mapping conflict on index {index}: field {field}")]
    MappingConflict { index: String, field: String },

    /// A backend-specific error (connection, serialization, bad request).
    #[error("index backend error: {0}")]
    Backend(String),
}

impl IndexError {
    pub fn not_found(index: &str) -> Self {
        IndexError::IndexNotFound {
            index: index.to_string(),
        }
    }

    pub fn not_implemented(operation: &str) -> Self {
        IndexError::NotImplemented {
            operation: operation.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}
