//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure (I/O, schema, constraint violations)
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure (share bundles, database directory)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested memory id absent
    #[error("memory '{id}' not found")]
    MemoryNotFound { id: String },

    /// Requested chunk id absent
    #[error("chunk '{id}' not found")]
    ChunkNotFound { id: String },

    /// Mutation violates an invariant (immutable field, deleted row,
    /// self-link)
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Caller-supplied input was rejected
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Database schema is newer than this build understands
    #[error("schema version mismatch: expected <= {expected}, found {found}")]
    SchemaVersionMismatch { expected: i64, found: i64 },

    /// Share bundle is malformed
    #[error("invalid share bundle: {message}")]
    InvalidBundle { message: String },
}

impl StoreError {
    /// Create a MemoryNotFound error.
    pub fn memory_not_found(id: impl Into<String>) -> Self {
        Self::MemoryNotFound { id: id.into() }
    }

    /// Create a ChunkNotFound error.
    pub fn chunk_not_found(id: impl Into<String>) -> Self {
        Self::ChunkNotFound { id: id.into() }
    }

    /// Create a Conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an InvalidBundle error.
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::memory_not_found("M-missing");
        assert!(err.to_string().contains("M-missing"));

        let err = StoreError::conflict("superseded_by is immutable");
        assert!(err.to_string().contains("immutable"));

        let err = StoreError::SchemaVersionMismatch {
            expected: 1,
            found: 9,
        };
        assert!(err.to_string().contains('9'));
    }
}
