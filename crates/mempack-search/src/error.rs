//! Search error types.

use thiserror::Error;

/// Errors that can occur in the retrieval-side crates.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Embedding provider disabled or failing. Non-fatal to retrieval
    /// (vector search reports empty with a status); fatal to an explicit
    /// embed call.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider returned malformed output
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// HTTP transport failure talking to a remote provider
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Store failure (never swallowed)
    #[error("store error: {0}")]
    Store(#[from] mempack_store::StoreError),

    /// Core failure (query processing, tokenization)
    #[error("core error: {0}")]
    Core(#[from] mempack_core::CoreError),
}

impl SearchError {
    /// Create a ProviderUnavailable error.
    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable(message.into())
    }

    /// Create an Embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::provider_unavailable("no api key");
        assert!(err.to_string().contains("no api key"));

        let err = SearchError::embedding("wrong vector count");
        assert!(err.to_string().contains("wrong vector count"));
    }
}
