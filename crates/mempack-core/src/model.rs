//! Row types for the mempack data model
//!
//! Every row is partitioned by `(repo_id, workspace)`. Identifiers are
//! opaque strings carrying a type prefix (`M-`, `C-`, `A-`, `S-`); see
//! [`crate::ids`]. Timestamps are epoch seconds.

use serde::{Deserialize, Serialize};

/// Workspace applied to rows when the caller does not name one.
pub const DEFAULT_WORKSPACE: &str = "default";

/// A repo registration row. One store file exists per `repo_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub repo_id: String,
    pub git_root: String,
    pub last_head: Option<String>,
    pub last_branch: Option<String>,
    pub has_git: bool,
    pub last_seen_at: i64,
}

/// A short human-curated record intended to survive across sessions.
///
/// Invariants enforced by the store:
/// - `id` is unique within `(repo_id, workspace)`
/// - `superseded_by`, once set, is immutable
/// - `deleted_at`, once set, tombstones the row (hidden from search,
///   retained for audit and the supersession chain)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub repo_id: String,
    pub workspace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub title: String,
    pub summary: String,
    /// Token count of `summary`, precomputed at write time. 0 = unknown.
    pub summary_tokens: i64,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    pub created_at: i64,
}

impl Memory {
    /// Whether the row is visible to search (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// The text the embedding pipeline vectorizes for this memory.
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.summary)
            .trim()
            .to_string()
    }
}

/// An ingested artifact (file, document, transcript) that chunks hang off.
///
/// Uniquely keyed by `(repo_id, workspace, source)`: re-ingesting a source
/// deletes the old artifact row and its chunks before inserting new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub repo_id: String,
    pub workspace: String,
    pub kind: String,
    pub source: String,
    pub content_hash: String,
    pub created_at: i64,
}

/// A sized, symbol-annotated slice of an ingested artifact.
///
/// `locator` is `git:<sha>:<relpath>#L<start>-L<end>` when the artifact
/// lives inside a git tree, else `file:<relpath>#L<start>-L<end>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub repo_id: String,
    pub workspace: String,
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub locator: String,
    pub text: String,
    pub text_hash: String,
    /// Token count of `text`, precomputed at write time. 0 = unknown.
    pub text_tokens: i64,
    pub chunk_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_kind: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Chunk {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The text the embedding pipeline vectorizes for this chunk.
    pub fn embedding_text(&self) -> &str {
        &self.text
    }
}

/// A directed relation between two items.
///
/// Self-links are rejected at the store layer. Supersession writes the
/// symmetric pair `(old, superseded_by, new)` and `(new, supersedes, old)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from_id: String,
    pub rel: String,
    pub to_id: String,
    pub weight: f64,
    pub created_at: i64,
}

/// Relation name written on the old side of a supersession pair.
pub const REL_SUPERSEDED_BY: &str = "superseded_by";
/// Relation name written on the new side of a supersession pair.
pub const REL_SUPERSEDES: &str = "supersedes";

/// The current per-workspace state document. Always valid JSON: callers
/// that write invalid JSON get it wrapped as `{"raw": "<original>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCurrent {
    pub state_json: String,
    pub tokens: i64,
    pub updated_at: i64,
}

impl Default for StateCurrent {
    fn default() -> Self {
        Self {
            state_json: "{}".to_string(),
            tokens: 0,
            updated_at: 0,
        }
    }
}

/// One append-only state history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub id: String,
    pub state_json: String,
    pub reason: String,
    pub tokens: i64,
    pub created_at: i64,
}

/// Which table an embedding or queue item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKind {
    Memory,
    Chunk,
}

impl EmbedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedKind::Memory => "memory",
            EmbedKind::Chunk => "chunk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(EmbedKind::Memory),
            "chunk" => Some(EmbedKind::Chunk),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmbedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted vector. Unique per `(repo_id, workspace, kind, item_id,
/// model)`; `content_hash` is the SHA-256 of the embedded text, so any
/// text change invalidates freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub repo_id: String,
    pub workspace: String,
    pub kind: EmbedKind,
    pub item_id: String,
    pub model: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
    pub vector_dim: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A pending embedding computation. FIFO by `queue_id`; rows are deleted
/// only after a successful upsert or when the referent no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingQueueItem {
    pub queue_id: i64,
    pub repo_id: String,
    pub workspace: String,
    pub kind: EmbedKind,
    pub item_id: String,
    pub model: String,
    pub created_at: i64,
}

/// A thread derived lazily from memories: title/tags/created_at are those
/// of the earliest memory sharing `(repo_id, workspace, thread_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub memory_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_embedding_text_trims() {
        let m = Memory {
            id: "M-1".into(),
            repo_id: "r".into(),
            workspace: DEFAULT_WORKSPACE.into(),
            thread_id: None,
            title: "Title".into(),
            summary: "".into(),
            summary_tokens: 0,
            tags: vec![],
            entities: vec![],
            anchor_commit: None,
            superseded_by: None,
            deleted_at: None,
            created_at: 0,
        };
        assert_eq!(m.embedding_text(), "Title");
    }

    #[test]
    fn test_memory_flags() {
        let mut m = Memory {
            id: "M-1".into(),
            repo_id: "r".into(),
            workspace: DEFAULT_WORKSPACE.into(),
            thread_id: None,
            title: "t".into(),
            summary: "s".into(),
            summary_tokens: 0,
            tags: vec![],
            entities: vec![],
            anchor_commit: None,
            superseded_by: None,
            deleted_at: None,
            created_at: 0,
        };
        assert!(m.is_active());
        assert!(!m.is_superseded());
        m.deleted_at = Some(100);
        m.superseded_by = Some("M-2".into());
        assert!(!m.is_active());
        assert!(m.is_superseded());
    }

    #[test]
    fn test_embed_kind_roundtrip() {
        assert_eq!(EmbedKind::parse("memory"), Some(EmbedKind::Memory));
        assert_eq!(EmbedKind::parse("chunk"), Some(EmbedKind::Chunk));
        assert_eq!(EmbedKind::parse("other"), None);
        assert_eq!(EmbedKind::Memory.to_string(), "memory");
    }
}
