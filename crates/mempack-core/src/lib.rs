//! Mempack Core - Data model and CPU-bound building blocks
//!
//! This crate provides the pieces of mempack that do not touch storage or
//! the network:
//! - Row types for memories, chunks, artifacts, links, state and embeddings
//! - Prefixed id generation and content hashing
//! - Token counting and truncation (tiktoken encodings)
//! - Query validation, rewriting and classification
//! - Language-aware semantic chunking via tree-sitter
//! - The repo-resolver seam and the process-wide repo cache

pub mod chunker;
pub mod clock;
pub mod error;
pub mod ids;
pub mod model;
pub mod query;
pub mod repo;
pub mod tokenizer;

// Re-exports for convenience
pub use chunker::{ChunkLanguage, ChunkerConfig, SemanticChunk, SemanticChunker};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::CoreError;
pub use ids::{
    artifact_id, chunk_id, content_hash, memory_id, sanitize_id_component, sanitize_tag,
    shared_import_id, state_id,
};
pub use model::{
    Artifact, Chunk, EmbedKind, EmbeddingQueueItem, EmbeddingRecord, Link, Memory, Repo,
    StateCurrent, StateHistoryEntry, ThreadInfo, DEFAULT_WORKSPACE, REL_SUPERSEDED_BY,
    REL_SUPERSEDES,
};
pub use query::{ProcessedQuery, QueryIntent, QueryProcessor, MAX_QUERY_CHARS};
pub use repo::{RepoCache, RepoInfo, RepoResolver};
pub use tokenizer::{BpeTokenizer, Tokenizer, DEFAULT_ENCODING};
