//! Core error types for kindred-core.
//!
//! Nothing here is fatal to the owning process: the worst outcome of any
//! failure is stale derived state. `NoRelationship` is an expected,
//! recoverable condition for unmatched users, not an error path callers
//! should log loudly about.

use thiserror::Error;

/// Errors surfaced by the progression engine to its caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The source reported no relationship for the user. Callers render an
    /// empty/onboarding view; retrying later is expected for new users.
    #[error("no active relationship for user '{user_id}'")]
    NoRelationship { user_id: String },

    /// A read from the relationship source failed. Retryable: the next
    /// manual refresh or change notification re-attempts the read.
    #[error("relationship source error: {0}")]
    Source(#[from] SourceError),

    /// The engine was disposed; no further commands are accepted.
    #[error("engine already disposed")]
    Disposed,
}

/// Errors produced by `RelationshipSource` implementations.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The backing service could not be reached (network, outage).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the query itself failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The backend returned a payload that failed validation at the
    /// boundary (missing fields, unknown enum values).
    #[error("malformed record: {0}")]
    InvalidRecord(String),
}

/// Result type alias for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
