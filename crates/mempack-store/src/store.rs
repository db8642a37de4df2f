//! Store connection lifecycle
//!
//! One [`Store`] wraps one SQLite connection to one per-repo database
//! file. The process owns at most one open store per repo id; retrieval
//! paths open (or rent) a handle and close it, the embedding worker keeps
//! its own. Writers are serialized by SQLite itself; readers run
//! concurrently under WAL.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mempack_core::model::Repo;

use crate::error::{Result, StoreError};
use crate::schema::{ALL_TABLES, SCHEMA_CREATE_INDEXES, SCHEMA_VERSION};

/// Timing and rewrite metadata attached to every lexical search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub candidate_time_ms: f64,
    pub fetch_time_ms: f64,
    pub candidate_count: usize,
    pub result_count: usize,
    /// Rewrites the store applied to make the query FTS-safe.
    pub rewrites: Vec<String>,
    /// Whether a store-level rewrite was in effect and produced results.
    pub rewrite_matched: bool,
    pub sanitized_query: String,
}

/// Row counts per table, for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub memories: i64,
    pub chunks: i64,
    pub artifacts: i64,
    pub links: i64,
    pub embeddings: i64,
    pub queue: i64,
    pub state_history: i64,
}

/// A connection to one repo's database.
pub struct Store {
    conn: Connection,
    repo_id: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("repo_id", &self.repo_id).finish()
    }
}

impl Store {
    /// Open (creating lazily if missing) the store file for `repo_id`
    /// under `dir`.
    pub fn open(dir: &Path, repo_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::db_path(dir, repo_id);
        let conn = Connection::open(&path)?;
        Self::from_connection(conn, repo_id)
    }

    /// In-memory store for tests.
    pub fn in_memory(repo_id: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, repo_id)
    }

    /// Database file path for a repo id.
    pub fn db_path(dir: &Path, repo_id: &str) -> PathBuf {
        dir.join(format!(
            "{}.db",
            mempack_core::sanitize_id_component(repo_id)
        ))
    }

    fn from_connection(conn: Connection, repo_id: &str) -> Result<Self> {
        Self::configure_connection(&conn)?;
        let store = Self {
            conn,
            repo_id: repo_id.to_string(),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Configure connection with durability and concurrency settings.
    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        // WAL for concurrent readers alongside the single writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Create or upgrade the schema, tracked via `PRAGMA user_version`.
    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        match version {
            0 => {
                debug!("initializing schema v{SCHEMA_VERSION} for {}", self.repo_id);
                for sql in ALL_TABLES {
                    self.conn.execute(sql, [])?;
                }
                self.conn.execute_batch(SCHEMA_CREATE_INDEXES)?;
                self.conn
                    .pragma_update(None, "user_version", SCHEMA_VERSION)?;
                Ok(())
            }
            v if v == SCHEMA_VERSION => Ok(()),
            v if v < SCHEMA_VERSION => {
                // No intermediate versions exist yet
                self.conn
                    .pragma_update(None, "user_version", SCHEMA_VERSION)?;
                Ok(())
            }
            v => Err(StoreError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: v,
            }),
        }
    }

    /// The repo this store belongs to.
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Insert or refresh the repo registration row.
    pub fn ensure_repo(&self, repo: &Repo) -> Result<()> {
        self.conn.execute(
            "INSERT INTO repos (repo_id, git_root, last_head, last_branch, has_git, last_seen_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(repo_id) DO UPDATE SET \
                 git_root = excluded.git_root, \
                 last_head = excluded.last_head, \
                 last_branch = excluded.last_branch, \
                 has_git = excluded.has_git, \
                 last_seen_at = excluded.last_seen_at",
            rusqlite::params![
                repo.repo_id,
                repo.git_root,
                repo.last_head,
                repo.last_branch,
                repo.has_git as i64,
                repo.last_seen_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch the repo registration row, if any.
    pub fn get_repo(&self, repo_id: &str) -> Result<Option<Repo>> {
        use rusqlite::OptionalExtension;
        let row = self
            .conn
            .query_row(
                "SELECT repo_id, git_root, last_head, last_branch, has_git, last_seen_at \
                 FROM repos WHERE repo_id = ?1",
                [repo_id],
                |row| {
                    Ok(Repo {
                        repo_id: row.get(0)?,
                        git_root: row.get(1)?,
                        last_head: row.get(2)?,
                        last_branch: row.get(3)?,
                        has_git: row.get::<_, i64>(4)? != 0,
                        last_seen_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };
        Ok(StoreStats {
            memories: count("memories")?,
            chunks: count("chunks")?,
            artifacts: count("artifacts")?,
            links: count("links")?,
            embeddings: count("embeddings")?,
            queue: count("embedding_queue")?,
            state_history: count("state_history")?,
        })
    }

    /// Rebuild both FTS tables from row storage. Tombstoned rows stay
    /// out of the index.
    pub fn reindex_fts(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM memories_fts", [])?;
        tx.execute(
            "INSERT INTO memories_fts(rowid, title, summary, tags, entities) \
             SELECT rowid, title, summary, tags, entities FROM memories WHERE deleted_at IS NULL",
            [],
        )?;
        tx.execute("DELETE FROM chunks_fts", [])?;
        tx.execute(
            "INSERT INTO chunks_fts(rowid, text, symbol_name, tags) \
             SELECT rowid, text, COALESCE(symbol_name, ''), tags FROM chunks \
             WHERE deleted_at IS NULL",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read a meta value.
    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a meta value.
    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}

/// Build an FTS5 MATCH expression from free text: tokens are extracted,
/// quoted, and OR-joined so user punctuation can never become FTS
/// operators. Returns the match string and the rewrites applied.
pub(crate) fn fts_query(raw: &str) -> (String, Vec<String>) {
    let tokens: Vec<String> = raw
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    let sanitized = tokens.join(" OR ");

    let mut rewrites = Vec::new();
    let plain = tokens
        .iter()
        .map(|t| t.trim_matches('"'))
        .collect::<Vec<_>>()
        .join(" ");
    if plain != raw.to_lowercase().trim() {
        rewrites.push(format!("{} -> {}", raw.trim(), plain));
    }
    (sanitized, rewrites)
}

/// Measure a closure's wall time in milliseconds.
pub(crate) fn timed<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed().as_secs_f64() * 1000.0)
}
