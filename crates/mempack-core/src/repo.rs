//! Repo resolution seam and the process-wide repo cache
//!
//! Actual git probing (detection, HEAD, ancestry) is an external
//! collaborator; the core consumes it through [`RepoResolver`]. The
//! [`RepoCache`] maps `git_root -> repo_id` for fast cwd-based resolution
//! and persists best-effort.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;

/// What the resolver knows about a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Stable repo identifier, computed once from origin + root.
    pub id: String,
    pub git_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub has_git: bool,
}

impl RepoInfo {
    /// Info for a directory with no git metadata at all.
    pub fn without_git(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            git_root: root.into(),
            head: None,
            branch: None,
            has_git: false,
        }
    }
}

/// Resolves paths to repos and answers commit ancestry probes.
///
/// `is_ancestor` may shell out or hit disk; the ranker bounds how many
/// times it is called per ranking pass.
pub trait RepoResolver: Send + Sync {
    /// Fast, non-strict detection: always returns something usable, even
    /// for a plain directory.
    fn detect(&self, path: &Path) -> RepoInfo;

    /// Strict detection: fails when `path` is not inside a repository.
    fn detect_base_strict(&self, path: &Path) -> Result<RepoInfo, CoreError>;

    /// Rebuild a `RepoInfo` from cached fields, optionally refreshing HEAD.
    fn info_from_cache(
        &self,
        id: &str,
        git_root: &Path,
        head: Option<&str>,
        branch: Option<&str>,
        refresh_head: bool,
    ) -> RepoInfo;

    /// Whether `candidate` is an ancestor of `head` in the repo at
    /// `git_root`.
    fn is_ancestor(&self, git_root: &Path, candidate: &str, head: &str) -> bool;
}

/// Process-wide `git_root -> repo_id` map under a single-writer lock.
///
/// Lifecycle: created on first open, flushed on process exit (persistence
/// is best-effort; a failed save only logs).
#[derive(Debug, Default)]
pub struct RepoCache {
    entries: RwLock<HashMap<String, String>>,
}

impl RepoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a repo id by git root.
    pub fn get(&self, git_root: &Path) -> Option<String> {
        let entries = self.entries.read().expect("repo cache lock poisoned");
        entries.get(&git_root.to_string_lossy().to_string()).cloned()
    }

    /// Record a resolution.
    pub fn insert(&self, git_root: &Path, repo_id: impl Into<String>) {
        let mut entries = self.entries.write().expect("repo cache lock poisoned");
        entries.insert(git_root.to_string_lossy().to_string(), repo_id.into());
    }

    /// Load cache contents from a JSON file. Missing or corrupt files
    /// leave the cache empty.
    pub fn load(&self, path: &Path) {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return,
        };
        match serde_json::from_str::<HashMap<String, String>>(&data) {
            Ok(map) => {
                let mut entries = self.entries.write().expect("repo cache lock poisoned");
                *entries = map;
            }
            Err(e) => warn!("ignoring corrupt repo cache at {}: {}", path.display(), e),
        }
    }

    /// Persist cache contents. Best-effort: failures are logged, not
    /// returned.
    pub fn save(&self, path: &Path) {
        let entries = self.entries.read().expect("repo cache lock poisoned");
        let data = match serde_json::to_string_pretty(&*entries) {
            Ok(data) => data,
            Err(e) => {
                warn!("repo cache serialize failed: {}", e);
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, data) {
            warn!("repo cache save to {} failed: {}", path.display(), e);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("repo cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
