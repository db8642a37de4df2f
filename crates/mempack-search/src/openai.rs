//! OpenAI-compatible embedding provider
//!
//! Works against any `/embeddings` endpoint speaking the OpenAI wire
//! format (OpenAI itself, Ollama, vLLM, LM Studio).
//!
//! # Endpoint Format
//!
//! - POST `{base_url}/embeddings`
//! - Request: `{"model": "...", "input": ["text1", "text2", ...]}`
//! - Response: `{"data": [{"embedding": [...], "index": 0}, ...], ...}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SearchError};
use crate::provider::EmbeddingProvider;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for retry backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL (e.g. "https://api.openai.com/v1" or
    /// "http://localhost:11434/v1")
    pub base_url: String,
    /// API key (optional for local endpoints like Ollama)
    pub api_key: Option<String>,
    /// Embedding model name
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "text-embedding-3-small".into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Create config from environment variables.
    ///
    /// - `MEMPACK_OPENAI_BASE_URL` - API base URL (default: https://api.openai.com/v1)
    /// - `MEMPACK_OPENAI_API_KEY` - API key (optional)
    /// - `MEMPACK_OPENAI_MODEL` - model name (default: text-embedding-3-small)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("MEMPACK_OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("MEMPACK_OPENAI_API_KEY").ok(),
            model: std::env::var("MEMPACK_OPENAI_MODEL").unwrap_or(defaults.model),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible HTTP embedding provider.
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::embedding(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(SearchError::embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may return out of input order; index restores it
        let mut vectors = vec![Vec::new(); texts.len()];
        for item in parsed.data {
            if item.index >= vectors.len() {
                return Err(SearchError::embedding(format!(
                    "vector index {} out of range",
                    item.index
                )));
            }
            vectors[item.index] = item.embedding;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
                debug!("embedding retry {attempt} after {delay}ms");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            match self.request_once(&texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    warn!("embedding attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| SearchError::embedding("no attempts were made")))
    }
}
