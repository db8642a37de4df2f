//! SQLite schema for the per-repo store
//!
//! One database file exists per repo id. Every row table carries
//! `(repo_id, workspace)` partition columns. Lexical search uses FTS5
//! shadow tables keyed by the base table's rowid and maintained by the
//! mutation functions (not triggers), so soft-deleting a row removes its
//! search visibility while the row itself stays for audit.

/// Current schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL to create the repos table (one row per registered repo).
pub const SCHEMA_CREATE_REPOS: &str = r#"
CREATE TABLE IF NOT EXISTS repos (
    repo_id TEXT PRIMARY KEY NOT NULL,
    git_root TEXT NOT NULL,
    last_head TEXT,
    last_branch TEXT,
    has_git INTEGER NOT NULL DEFAULT 0,
    last_seen_at INTEGER NOT NULL
)
"#;

/// SQL to create the memories table.
///
/// `tags` and `entities` are JSON arrays. `superseded_by` is immutable
/// once set; `deleted_at` tombstones the row.
pub const SCHEMA_CREATE_MEMORIES: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    thread_id TEXT,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    summary_tokens INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    entities TEXT NOT NULL DEFAULT '[]',
    anchor_commit TEXT,
    superseded_by TEXT,
    deleted_at INTEGER,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, workspace, id)
)
"#;

/// FTS5 shadow table for memories, keyed by memories.rowid.
pub const SCHEMA_CREATE_MEMORIES_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    title,
    summary,
    tags,
    entities
)
"#;

/// SQL to create the artifacts table.
///
/// `(repo_id, workspace, source)` is unique: re-ingesting a source
/// replaces the old artifact and soft-deletes its chunks.
pub const SCHEMA_CREATE_ARTIFACTS: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, workspace, id),
    UNIQUE (repo_id, workspace, source)
)
"#;

/// SQL to create the chunks table.
pub const SCHEMA_CREATE_CHUNKS: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    artifact_id TEXT NOT NULL,
    thread_id TEXT,
    locator TEXT NOT NULL,
    text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    text_tokens INTEGER NOT NULL DEFAULT 0,
    chunk_type TEXT NOT NULL,
    symbol_name TEXT,
    symbol_kind TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    deleted_at INTEGER,
    PRIMARY KEY (repo_id, workspace, id)
)
"#;

/// FTS5 shadow table for chunks, keyed by chunks.rowid.
pub const SCHEMA_CREATE_CHUNKS_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    symbol_name,
    tags
)
"#;

/// SQL to create the links table. Duplicate `(from, rel, to)` inserts
/// are idempotent via the primary key.
pub const SCHEMA_CREATE_LINKS: &str = r#"
CREATE TABLE IF NOT EXISTS links (
    from_id TEXT NOT NULL,
    rel TEXT NOT NULL,
    to_id TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (from_id, rel, to_id)
)
"#;

/// SQL to create the current-state table (one row per workspace).
pub const SCHEMA_CREATE_STATE_CURRENT: &str = r#"
CREATE TABLE IF NOT EXISTS state_current (
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    state_json TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, workspace)
)
"#;

/// SQL to create the append-only state history table.
pub const SCHEMA_CREATE_STATE_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS state_history (
    id TEXT PRIMARY KEY NOT NULL,
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    state_json TEXT NOT NULL,
    reason TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
)
"#;

/// SQL to create the embeddings table. Vectors are little-endian f32
/// blobs; `content_hash` is the SHA-256 of the embedded text.
pub const SCHEMA_CREATE_EMBEDDINGS: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    kind TEXT NOT NULL,
    item_id TEXT NOT NULL,
    model TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    vector BLOB NOT NULL,
    vector_dim INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, workspace, kind, item_id, model)
)
"#;

/// SQL to create the embedding work queue. `queue_id` is the monotonic
/// FIFO sequence; the UNIQUE constraint collapses repeat enqueues of the
/// same item.
pub const SCHEMA_CREATE_EMBEDDING_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS embedding_queue (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id TEXT NOT NULL,
    workspace TEXT NOT NULL,
    kind TEXT NOT NULL,
    item_id TEXT NOT NULL,
    model TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (repo_id, workspace, kind, item_id, model)
)
"#;

/// SQL to create the key/value meta table (worker status and the like;
/// nothing schema-critical lives here).
pub const SCHEMA_CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL to create indexes for the common query paths.
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_memories_thread ON memories(repo_id, workspace, thread_id);
CREATE INDEX IF NOT EXISTS idx_memories_deleted ON memories(repo_id, workspace, deleted_at);
CREATE INDEX IF NOT EXISTS idx_chunks_artifact ON chunks(repo_id, workspace, artifact_id);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(repo_id, workspace, text_hash);
CREATE INDEX IF NOT EXISTS idx_artifacts_source ON artifacts(repo_id, workspace, source);
CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_id);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_id);
CREATE INDEX IF NOT EXISTS idx_state_history_ws ON state_history(repo_id, workspace, created_at);
CREATE INDEX IF NOT EXISTS idx_queue_model ON embedding_queue(repo_id, model, queue_id);
"#;

/// All table-creation statements in dependency order.
pub const ALL_TABLES: &[&str] = &[
    SCHEMA_CREATE_REPOS,
    SCHEMA_CREATE_MEMORIES,
    SCHEMA_CREATE_MEMORIES_FTS,
    SCHEMA_CREATE_ARTIFACTS,
    SCHEMA_CREATE_CHUNKS,
    SCHEMA_CREATE_CHUNKS_FTS,
    SCHEMA_CREATE_LINKS,
    SCHEMA_CREATE_STATE_CURRENT,
    SCHEMA_CREATE_STATE_HISTORY,
    SCHEMA_CREATE_EMBEDDINGS,
    SCHEMA_CREATE_EMBEDDING_QUEUE,
    SCHEMA_CREATE_META,
];

/// Column list for memory queries (in row-mapping order).
pub const MEMORY_COLUMNS: &str = "id, repo_id, workspace, thread_id, title, summary, \
     summary_tokens, tags, entities, anchor_commit, superseded_by, deleted_at, created_at";

/// Column list for chunk queries (in row-mapping order).
pub const CHUNK_COLUMNS: &str = "id, repo_id, workspace, artifact_id, thread_id, locator, text, \
     text_hash, text_tokens, chunk_type, symbol_name, symbol_kind, tags, created_at, deleted_at";

/// Column list for embedding queries (in row-mapping order).
pub const EMBEDDING_COLUMNS: &str = "repo_id, workspace, kind, item_id, model, content_hash, \
     vector, vector_dim, created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        for sql in ALL_TABLES {
            conn.execute(sql, []).unwrap();
        }
        conn.execute_batch(SCHEMA_CREATE_INDEXES).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "repos",
            "memories",
            "artifacts",
            "chunks",
            "links",
            "state_current",
            "state_history",
            "embeddings",
            "embedding_queue",
            "meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_fts_tables_accept_match_queries() {
        let conn = Connection::open_in_memory().unwrap();
        for sql in ALL_TABLES {
            conn.execute(sql, []).unwrap();
        }
        conn.execute(
            "INSERT INTO memories_fts(rowid, title, summary, tags, entities) VALUES (1, 'a', 'first decision', '', '')",
            [],
        )
        .unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'decision'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
