//! Core error types.

use thiserror::Error;

/// Errors produced by the core building blocks (query processing,
/// tokenization, chunking, repo resolution).
#[derive(Error, Debug)]
pub enum CoreError {
    /// Caller-supplied input was rejected (argument error class)
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The named token encoding could not be initialized
    #[error("tokenizer unavailable for encoding '{encoding}': {message}")]
    TokenizerUnavailable { encoding: String, message: String },

    /// No repo could be resolved for the given path
    #[error("not a repository: '{path}'")]
    RepoUnresolvable { path: String },

    /// Chunker failed to process the input
    #[error("chunking failed: {0}")]
    Chunking(String),
}

impl CoreError {
    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a TokenizerUnavailable error.
    pub fn tokenizer_unavailable(
        encoding: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TokenizerUnavailable {
            encoding: encoding.into(),
            message: message.into(),
        }
    }

    /// Create a RepoUnresolvable error.
    pub fn repo_unresolvable(path: impl Into<String>) -> Self {
        Self::RepoUnresolvable { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_input("query is empty");
        assert!(err.to_string().contains("query is empty"));

        let err = CoreError::tokenizer_unavailable("cl999k", "unknown encoding");
        assert!(err.to_string().contains("cl999k"));

        let err = CoreError::repo_unresolvable("/tmp/nowhere");
        assert!(err.to_string().contains("/tmp/nowhere"));
    }
}
