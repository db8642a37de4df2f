//! Embedding provider trait and status types
//!
//! The core abstraction for turning text into vectors. Implementations:
//! - `OpenAIProvider` - OpenAI-compatible HTTP APIs (OpenAI, Ollama, vLLM)
//! - `HashedProvider` - deterministic offline token-hash projection
//!
//! All methods are async so remote providers can await HTTP calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Diagnostic description of the configured provider. Carried into
/// vector-search status so callers can see why vector results were
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Provider name ("openai", "hashed", "none")
    pub provider: String,
    /// Model identifier used for embeddings
    pub model: String,
    /// Whether a usable provider is configured
    pub enabled: bool,
    /// Error message when the provider could not be constructed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderStatus {
    /// Status for a usable provider.
    pub fn enabled(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            enabled: true,
            error: None,
        }
    }

    /// Status for a disabled or failed provider.
    pub fn disabled(
        provider: impl Into<String>,
        model: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            enabled: false,
            error,
        }
    }
}

/// Embedding provider trait.
///
/// Implementations must be `Send + Sync`; the worker and the retrieval
/// path share one provider behind an `Arc`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name identifier.
    fn name(&self) -> &str;

    /// Embed a batch of texts.
    ///
    /// Returns one vector per input, all with the same provider-defined
    /// dimension, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_constructors() {
        let status = ProviderStatus::enabled("openai", "text-embedding-3-small");
        assert!(status.enabled);
        assert!(status.error.is_none());

        let status = ProviderStatus::disabled("none", "", Some("provider is off".into()));
        assert!(!status.enabled);
        assert_eq!(status.error.as_deref(), Some("provider is off"));
    }
}
