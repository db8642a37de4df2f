//! Mempack Search - embeddings, vector search, ranking, worker
//!
//! The retrieval-side crate: embedding provider abstraction (OpenAI-
//! compatible HTTP and a deterministic offline projection), brute-force
//! cosine vector search over the store, the RRF ranker with its bonus
//! and penalty stack, and the queue-draining embedding worker.

pub mod error;
pub mod hashed;
pub mod openai;
pub mod provider;
pub mod ranker;
pub mod resolve;
pub mod vector;
pub mod worker;

// Re-exports for convenience
pub use error::{Result, SearchError};
pub use hashed::{HashedProvider, HASHED_DIM};
pub use openai::{OpenAIConfig, OpenAIProvider};
pub use provider::{EmbeddingProvider, ProviderStatus};
pub use ranker::{
    contains_injection, rank_chunks, rank_memories, rrf, MatchedThread, MemoryRankInputs,
    MemoryRanking, RankedChunk, RankedMemory, RankerConfig, RankingStats, INJECTION_PHRASES,
};
pub use resolve::{effective_model, resolve, ProviderConfig, ProviderSelector};
pub use vector::{cosine_similarity, vector_search, VectorResult, VectorSearchStatus};
pub use worker::{DrainOutcome, EmbeddingWorker, WorkerConfig};
