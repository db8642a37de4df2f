//! Pack assembly error types.

use thiserror::Error;

/// Errors that can occur while assembling a context pack.
#[derive(Error, Debug)]
pub enum PackError {
    /// No repo could be resolved and the caller required one
    #[error("repository required but none resolved: {path}")]
    RepoUnresolvable { path: String },

    /// Query processing, tokenization or chunking failed
    #[error("core error: {0}")]
    Core(#[from] mempack_core::CoreError),

    /// Store failure (never swallowed)
    #[error("store error: {0}")]
    Store(#[from] mempack_store::StoreError),

    /// Retrieval-side failure
    #[error("search error: {0}")]
    Search(#[from] mempack_search::SearchError),

    /// Pack serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PackError {
    /// Create a RepoUnresolvable error.
    pub fn repo_unresolvable(path: impl Into<String>) -> Self {
        Self::RepoUnresolvable { path: path.into() }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PackError::repo_unresolvable("/tmp/nowhere");
        assert!(err.to_string().contains("/tmp/nowhere"));
    }
}
