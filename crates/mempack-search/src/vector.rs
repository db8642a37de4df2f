//! Brute-force cosine search over stored vectors
//!
//! Loads the partition's embeddings, scores them against the embedded
//! query, and keeps candidates above the similarity floor. When the
//! result is empty the returned status says why (provider off, nothing
//! stored yet, provider call failed), so the assembler can record it
//! instead of guessing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use mempack_core::model::EmbedKind;
use mempack_store::Store;

use crate::error::Result;
use crate::provider::{EmbeddingProvider, ProviderStatus};

/// One scored vector candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorResult {
    pub id: String,
    pub score: f64,
}

/// Why vector search returned what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchStatus {
    pub provider: String,
    pub model: String,
    pub enabled: bool,
    pub min_similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cosine similarity; 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score the query against every stored vector for
/// `(workspace, kind, model)`.
///
/// Candidates with a different dimension than the query vector are
/// skipped. Results are ordered score-descending with `item_id` breaking
/// ties, truncated to `limit`.
pub async fn vector_search(
    store: &Store,
    workspace: &str,
    kind: EmbedKind,
    model: &str,
    provider: Option<&Arc<dyn EmbeddingProvider>>,
    provider_status: &ProviderStatus,
    query_text: &str,
    limit: usize,
    min_similarity: f64,
) -> Result<(Vec<VectorResult>, VectorSearchStatus)> {
    let mut status = VectorSearchStatus {
        provider: provider_status.provider.clone(),
        model: model.to_string(),
        enabled: provider_status.enabled,
        min_similarity,
        error: provider_status.error.clone(),
    };

    let provider = match provider {
        Some(p) => p,
        None => {
            if status.error.is_none() {
                status.error = Some("embedding provider disabled".into());
            }
            return Ok((Vec::new(), status));
        }
    };

    let stored = store.list_embeddings(workspace, kind, model)?;
    if stored.is_empty() {
        status.error = Some("no stored vectors for this model yet".into());
        return Ok((Vec::new(), status));
    }

    let query_vector = match provider.embed(vec![query_text.to_string()]).await {
        Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
        Ok(_) => {
            status.error = Some("provider returned no query vector".into());
            return Ok((Vec::new(), status));
        }
        Err(e) => {
            status.error = Some(format!("query embedding failed: {e}"));
            return Ok((Vec::new(), status));
        }
    };

    let mut results: Vec<VectorResult> = stored
        .iter()
        .filter(|rec| rec.vector_dim == query_vector.len())
        .map(|rec| VectorResult {
            id: rec.item_id.clone(),
            score: cosine_similarity(&rec.vector, &query_vector),
        })
        .filter(|r| r.score >= min_similarity)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);

    debug!(
        "vector search ({kind}): {} stored, {} over floor {min_similarity}",
        stored.len(),
        results.len()
    );
    Ok((results, status))
}
