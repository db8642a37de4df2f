//! Provider selection
//!
//! `resolve` turns a [`ProviderConfig`] into an optional provider plus a
//! [`ProviderStatus`] explaining the outcome. A failed or disabled
//! resolution is not an error at this layer: retrieval degrades to
//! lexical-only search and the status says why.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hashed::HashedProvider;
use crate::openai::{OpenAIConfig, OpenAIProvider};
use crate::provider::{EmbeddingProvider, ProviderStatus};

/// Which provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSelector {
    /// Pick openai when credentials are configured, else none
    #[default]
    Auto,
    /// Embeddings disabled
    None,
    /// OpenAI-compatible HTTP endpoint
    Openai,
    /// Deterministic offline token-hash provider
    Hashed,
}

/// Configuration for provider resolution.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub selector: ProviderSelector,
    /// Overrides the provider's default model name when set.
    pub model: Option<String>,
    pub openai: Option<OpenAIConfig>,
}

impl ProviderConfig {
    pub fn none() -> Self {
        Self {
            selector: ProviderSelector::None,
            ..Default::default()
        }
    }

    pub fn hashed() -> Self {
        Self {
            selector: ProviderSelector::Hashed,
            ..Default::default()
        }
    }

    pub fn openai(config: OpenAIConfig) -> Self {
        Self {
            selector: ProviderSelector::Openai,
            model: Some(config.model.clone()),
            openai: Some(config),
        }
    }
}

/// The model name a resolution will embed with.
pub fn effective_model(config: &ProviderConfig) -> String {
    if let Some(model) = &config.model {
        return model.clone();
    }
    match config.selector {
        ProviderSelector::Openai | ProviderSelector::Auto => config
            .openai
            .as_ref()
            .map(|c| c.model.clone())
            .unwrap_or_else(|| OpenAIConfig::default().model),
        ProviderSelector::Hashed => "hashed-256".to_string(),
        ProviderSelector::None => String::new(),
    }
}

/// Select a provider. Never fails: when nothing usable is configured the
/// provider is None and the status carries the reason.
pub fn resolve(config: &ProviderConfig) -> (Option<Arc<dyn EmbeddingProvider>>, ProviderStatus) {
    let model = effective_model(config);
    match config.selector {
        ProviderSelector::None => (
            None,
            ProviderStatus::disabled("none", model, Some("provider is set to none".into())),
        ),
        ProviderSelector::Hashed => {
            let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashedProvider::default());
            (Some(provider), ProviderStatus::enabled("hashed", model))
        }
        ProviderSelector::Openai => {
            let openai_config = config.openai.clone().unwrap_or_else(OpenAIConfig::from_env);
            match OpenAIProvider::new(openai_config) {
                Ok(provider) => (
                    Some(Arc::new(provider)),
                    ProviderStatus::enabled("openai", model),
                ),
                Err(e) => (
                    None,
                    ProviderStatus::disabled("openai", model, Some(e.to_string())),
                ),
            }
        }
        ProviderSelector::Auto => {
            // Auto picks openai only when credentials exist somewhere
            let has_creds = config
                .openai
                .as_ref()
                .map(|c| c.api_key.is_some())
                .unwrap_or(false)
                || std::env::var("MEMPACK_OPENAI_API_KEY").is_ok()
                || std::env::var("MEMPACK_OPENAI_BASE_URL").is_ok();
            if has_creds {
                let resolved = ProviderConfig {
                    selector: ProviderSelector::Openai,
                    model: config.model.clone(),
                    openai: config.openai.clone(),
                };
                resolve(&resolved)
            } else {
                debug!("auto provider resolution found no credentials");
                (
                    None,
                    ProviderStatus::disabled(
                        "auto",
                        model,
                        Some("no embedding credentials configured".into()),
                    ),
                )
            }
        }
    }
}
