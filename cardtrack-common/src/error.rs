//! Common error types for cardtrack

use thiserror::Error;

/// Common result type for cardtrack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store, the engines and the HTTP layer
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-layer failure; the enclosing atomic unit has been rolled back
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or missing field, invalid enumeration value
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access policy denial
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Reconciliation requested against an empty continuation set
    #[error("No data: {0}")]
    NoData(String),

    /// Assignment target missing, inactive or not an Officer
    #[error("Invalid assignee: {0}")]
    InvalidAssignee(String),

    /// Caller could not be resolved to an active principal
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Concurrent modification detected (optimistic revision mismatch)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map a failed INSERT/UPDATE to `DuplicateKey` when SQLite reports a
    /// unique-constraint violation, otherwise keep it as a database error.
    pub fn from_write(err: sqlx::Error, describe_key: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::DuplicateKey(describe_key())
            }
            _ => Error::Database(err),
        }
    }
}
