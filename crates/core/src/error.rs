/// A request rejected before any write reaches the primary store or the index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Timestamps are epoch milliseconds and must be 13 digits long.
    #[error("timestamp {timestamp} is not a valid epoch-milliseconds value")]
    InvalidTimestamp { timestamp: i64 },

    /// A required field was empty or absent.
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// Time range bounds are inverted.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    /// Failed-rows samples are only accepted while the latest result failed.
    #[error("test case '{test_case_fqn}' is not currently failing")]
    NotFailing { test_case_fqn: String },
}

/// Errors raised while routing a change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The change names an entity type with no index mapping.
    #[error("no index is mapped for entity type '{entity_type}'")]
    UnknownEntityType { entity_type: String },

    /// A field change carried a value of the wrong shape (e.g. owners not an array).
    #[error("malformed value for field '{field}': {message}")]
    MalformedValue { field: String, message: String },
}
