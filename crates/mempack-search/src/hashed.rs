//! Deterministic offline embedding provider
//!
//! Projects SHA-256 hashes of word tokens onto a fixed-dimension vector
//! and L2-normalizes the result. No network, no model files; identical
//! text always embeds identically, and texts sharing vocabulary land
//! close in cosine space. Good enough for tests and for air-gapped
//! setups where lexical search does the heavy lifting.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::provider::EmbeddingProvider;

/// Default vector dimension.
pub const HASHED_DIM: usize = 256;

/// Token-hash projection provider.
pub struct HashedProvider {
    dim: usize,
}

impl Default for HashedProvider {
    fn default() -> Self {
        Self { dim: HASHED_DIM }
    }
}

impl HashedProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dim;
            // Second hash byte decides sign so buckets don't only add up
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedProvider {
    fn name(&self) -> &str {
        "hashed"
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let provider = HashedProvider::default();
        let a = provider.embed(vec!["session cookies".into()]).await.unwrap();
        let b = provider.embed(vec!["session cookies".into()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), HASHED_DIM);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let provider = HashedProvider::default();
        let vectors = provider
            .embed(vec![
                "the auth decision uses session cookies".into(),
                "session cookies for auth".into(),
                "tomato soup recipe with basil".into(),
            ])
            .await
            .unwrap();
        let related = cosine(&vectors[0], &vectors[1]);
        let unrelated = cosine(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn test_vectors_are_normalized() {
        let provider = HashedProvider::default();
        let vectors = provider.embed(vec!["some words here".into()]).await.unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
