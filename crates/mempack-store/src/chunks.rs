//! Artifact ingestion and chunk storage
//!
//! Chunks are born in batch with their artifact. Re-ingesting the same
//! `(workspace, source)` replaces the artifact row and soft-deletes the
//! previous chunks, so stale text drops out of search while staying on
//! disk for audit.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use mempack_core::model::{Artifact, Chunk};

use crate::error::{Result, StoreError};
use crate::memories::json_vec;
use crate::schema::CHUNK_COLUMNS;
use crate::store::{fts_query, timed, SearchStats, Store};

/// Fields for a new artifact row.
#[derive(Debug, Clone, Default)]
pub struct NewArtifact {
    /// Caller-supplied id; generated (`A-…`) when None.
    pub id: Option<String>,
    pub workspace: String,
    pub kind: String,
    pub source: String,
    pub content_hash: String,
    pub created_at: i64,
}

/// Fields for a new chunk row. `text_hash` is computed from `text` when
/// left empty.
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    /// Caller-supplied id; generated (`C-…`) when None.
    pub id: Option<String>,
    pub thread_id: Option<String>,
    pub locator: String,
    pub text: String,
    pub text_hash: String,
    pub text_tokens: i64,
    pub chunk_type: String,
    pub symbol_name: Option<String>,
    pub symbol_kind: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
}

/// One lexical hit: the row plus its raw BM25 score (lower = better).
#[derive(Debug, Clone)]
pub struct ChunkSearchHit {
    pub chunk: Chunk,
    pub bm25: f64,
}

pub(crate) fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        workspace: row.get(2)?,
        artifact_id: row.get(3)?,
        thread_id: row.get(4)?,
        locator: row.get(5)?,
        text: row.get(6)?,
        text_hash: row.get(7)?,
        text_tokens: row.get(8)?,
        chunk_type: row.get(9)?,
        symbol_name: row.get(10)?,
        symbol_kind: row.get(11)?,
        tags: json_vec(row, 12)?,
        created_at: row.get(13)?,
        deleted_at: row.get(14)?,
    })
}

impl Store {
    /// Ingest an artifact and its chunks in one transaction.
    ///
    /// Any previous artifact with the same `(workspace, source)` is
    /// removed and its chunks are soft-deleted first.
    pub fn ingest_artifact(
        &mut self,
        new: NewArtifact,
        chunks: Vec<NewChunk>,
    ) -> Result<(Artifact, Vec<Chunk>)> {
        let artifact_id = new.id.clone().unwrap_or_else(mempack_core::artifact_id);
        let repo_id = self.repo_id().to_string();
        let workspace = new.workspace.clone();

        let tx = self.conn_mut().transaction()?;

        // Replace-by-source: soft-delete prior chunks, drop prior artifacts
        let mut stmt = tx.prepare(
            "SELECT id FROM artifacts WHERE repo_id = ?1 AND workspace = ?2 AND source = ?3",
        )?;
        let old_artifacts: Vec<String> = stmt
            .query_map(params![repo_id, workspace, new.source], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        for old_id in &old_artifacts {
            soft_delete_chunks_by_artifact(&tx, &repo_id, &workspace, old_id, new.created_at)?;
        }
        tx.execute(
            "DELETE FROM artifacts WHERE repo_id = ?1 AND workspace = ?2 AND source = ?3",
            params![repo_id, workspace, new.source],
        )?;

        tx.execute(
            "INSERT INTO artifacts (id, repo_id, workspace, kind, source, content_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                artifact_id,
                repo_id,
                workspace,
                new.kind,
                new.source,
                new.content_hash,
                new.created_at,
            ],
        )?;

        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_id = chunk.id.clone().unwrap_or_else(mempack_core::chunk_id);
            let text_hash = if chunk.text_hash.is_empty() {
                mempack_core::content_hash(&chunk.text)
            } else {
                chunk.text_hash.clone()
            };
            let tags_json = serde_json::to_string(&chunk.tags)?;
            tx.execute(
                "INSERT INTO chunks (id, repo_id, workspace, artifact_id, thread_id, locator, \
                 text, text_hash, text_tokens, chunk_type, symbol_name, symbol_kind, tags, \
                 created_at, deleted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL)",
                params![
                    chunk_id,
                    repo_id,
                    workspace,
                    artifact_id,
                    chunk.thread_id,
                    chunk.locator,
                    chunk.text,
                    text_hash,
                    chunk.text_tokens,
                    chunk.chunk_type,
                    chunk.symbol_name,
                    chunk.symbol_kind,
                    tags_json,
                    chunk.created_at,
                ],
            )?;
            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO chunks_fts(rowid, text, symbol_name, tags) VALUES (?1, ?2, ?3, ?4)",
                params![
                    rowid,
                    chunk.text,
                    chunk.symbol_name.as_deref().unwrap_or(""),
                    chunk.tags.join(" "),
                ],
            )?;
            chunk_ids.push(chunk_id);
        }
        tx.commit()?;

        debug!(
            "ingested artifact {artifact_id} ({} chunks, {} replaced)",
            chunk_ids.len(),
            old_artifacts.len()
        );

        let artifact = self.get_artifact(&workspace, &artifact_id)?;
        let stored = self.get_chunks_by_ids(&workspace, &chunk_ids)?;
        Ok((artifact, stored))
    }

    /// Fetch one artifact row.
    pub fn get_artifact(&self, workspace: &str, id: &str) -> Result<Artifact> {
        self.conn()
            .query_row(
                "SELECT id, repo_id, workspace, kind, source, content_hash, created_at \
                 FROM artifacts WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3",
                params![self.repo_id(), workspace, id],
                |row| {
                    Ok(Artifact {
                        id: row.get(0)?,
                        repo_id: row.get(1)?,
                        workspace: row.get(2)?,
                        kind: row.get(3)?,
                        source: row.get(4)?,
                        content_hash: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::invalid_input(format!("artifact '{id}' not found")))
    }

    /// Fetch one chunk (tombstoned rows included).
    pub fn get_chunk(&self, workspace: &str, id: &str) -> Result<Chunk> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3"
        );
        self.conn()
            .query_row(&sql, params![self.repo_id(), workspace, id], row_to_chunk)
            .optional()?
            .ok_or_else(|| StoreError::chunk_not_found(id))
    }

    /// Fetch several chunks by id, preserving input order and skipping
    /// ids that do not exist.
    pub fn get_chunks_by_ids(&self, workspace: &str, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_chunk(workspace, id) {
                Ok(chunk) => out.push(chunk),
                Err(StoreError::ChunkNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Tombstone one chunk. A second call is a no-op.
    pub fn forget_chunk(&mut self, workspace: &str, id: &str, now: i64) -> Result<()> {
        let current = self.get_chunk(workspace, id)?;
        if !current.is_active() {
            return Ok(());
        }
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE chunks SET deleted_at = ?1 \
             WHERE repo_id = ?2 AND workspace = ?3 AND id = ?4",
            params![now, repo_id, workspace, id],
        )?;
        let rowid: i64 = tx.query_row(
            "SELECT rowid FROM chunks WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3",
            params![repo_id, workspace, id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", [rowid])?;
        tx.commit()?;
        Ok(())
    }

    /// Soft-delete every active chunk belonging to artifacts with the
    /// given source. Returns how many chunks were tombstoned.
    pub fn delete_chunks_by_source(
        &mut self,
        workspace: &str,
        source: &str,
        now: i64,
    ) -> Result<usize> {
        let repo_id = self.repo_id().to_string();
        let tx = self.conn_mut().transaction()?;
        let mut stmt = tx.prepare(
            "SELECT id FROM artifacts WHERE repo_id = ?1 AND workspace = ?2 AND source = ?3",
        )?;
        let artifact_ids: Vec<String> = stmt
            .query_map(params![repo_id, workspace, source], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let mut total = 0;
        for artifact_id in &artifact_ids {
            total += soft_delete_chunks_by_artifact(&tx, &repo_id, workspace, artifact_id, now)?;
        }
        tx.commit()?;
        Ok(total)
    }

    /// BM25-ordered lexical search over active chunks.
    pub fn search_chunks(
        &self,
        workspace: &str,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<ChunkSearchHit>, SearchStats)> {
        let (match_expr, rewrites) = fts_query(query);
        let mut stats = SearchStats {
            rewrites,
            sanitized_query: match_expr.clone(),
            ..Default::default()
        };
        if match_expr.is_empty() {
            return Ok((Vec::new(), stats));
        }

        let (candidate_count, candidate_time) = timed(|| -> Result<usize> {
            let count: i64 = self.conn().query_row(
                "SELECT COUNT(*) FROM chunks_fts \
                 JOIN chunks c ON c.rowid = chunks_fts.rowid \
                 WHERE chunks_fts MATCH ?1 AND c.repo_id = ?2 AND c.workspace = ?3 \
                   AND c.deleted_at IS NULL",
                params![match_expr, self.repo_id(), workspace],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        });
        stats.candidate_count = candidate_count?;
        stats.candidate_time_ms = candidate_time;

        let sql = format!(
            "SELECT {}, bm25(chunks_fts) AS score \
             FROM chunks_fts \
             JOIN chunks c ON c.rowid = chunks_fts.rowid \
             WHERE chunks_fts MATCH ?1 AND c.repo_id = ?2 AND c.workspace = ?3 \
               AND c.deleted_at IS NULL \
             ORDER BY score ASC, c.id ASC \
             LIMIT ?4",
            CHUNK_COLUMNS
                .split(", ")
                .map(|col| format!("c.{col}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let (hits, fetch_time) = timed(|| -> Result<Vec<ChunkSearchHit>> {
            let mut stmt = self.conn().prepare(&sql)?;
            let rows = stmt.query_map(
                params![match_expr, self.repo_id(), workspace, limit as i64],
                |row| {
                    let chunk = row_to_chunk(row)?;
                    let bm25: f64 = row.get(15)?;
                    Ok(ChunkSearchHit { chunk, bm25 })
                },
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        });
        let hits = hits?;
        stats.fetch_time_ms = fetch_time;
        stats.result_count = hits.len();
        stats.rewrite_matched = !stats.rewrites.is_empty() && !hits.is_empty();
        Ok((hits, stats))
    }
}

/// Soft-delete active chunks of one artifact inside an open transaction.
fn soft_delete_chunks_by_artifact(
    tx: &rusqlite::Transaction<'_>,
    repo_id: &str,
    workspace: &str,
    artifact_id: &str,
    now: i64,
) -> Result<usize> {
    let mut stmt = tx.prepare(
        "SELECT rowid FROM chunks \
         WHERE repo_id = ?1 AND workspace = ?2 AND artifact_id = ?3 AND deleted_at IS NULL",
    )?;
    let rowids: Vec<i64> = stmt
        .query_map(params![repo_id, workspace, artifact_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    for rowid in &rowids {
        tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", [rowid])?;
    }
    tx.execute(
        "UPDATE chunks SET deleted_at = ?1 \
         WHERE repo_id = ?2 AND workspace = ?3 AND artifact_id = ?4 AND deleted_at IS NULL",
        params![now, repo_id, workspace, artifact_id],
    )?;
    Ok(rowids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::model::DEFAULT_WORKSPACE;

    fn store() -> Store {
        Store::in_memory("repo-test").unwrap()
    }

    fn artifact_for(source: &str) -> NewArtifact {
        NewArtifact {
            workspace: DEFAULT_WORKSPACE.into(),
            kind: "file".into(),
            source: source.into(),
            content_hash: "h".into(),
            created_at: 10,
            ..Default::default()
        }
    }

    fn chunk_with(text: &str, thread: Option<&str>) -> NewChunk {
        NewChunk {
            thread_id: thread.map(|t| t.to_string()),
            locator: "file:src/lib.rs#L1-L3".into(),
            text: text.into(),
            chunk_type: "block".into(),
            created_at: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_ingest_and_search() {
        let mut store = store();
        let (artifact, chunks) = store
            .ingest_artifact(
                artifact_for("src/lib.rs"),
                vec![chunk_with("fn parse_widget() { body }", None)],
            )
            .unwrap();
        assert!(artifact.id.starts_with("A-"));
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].text_hash.is_empty());

        let (hits, stats) = store
            .search_chunks(DEFAULT_WORKSPACE, "parse_widget", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, chunks[0].id);
        assert!(stats.result_count == 1);
    }

    #[test]
    fn test_reingest_soft_deletes_previous_chunks() {
        let mut store = store();
        let (_, old_chunks) = store
            .ingest_artifact(
                artifact_for("notes.md"),
                vec![chunk_with("original body text", None)],
            )
            .unwrap();
        let (_, new_chunks) = store
            .ingest_artifact(
                artifact_for("notes.md"),
                vec![chunk_with("replacement body text", None)],
            )
            .unwrap();

        // Old chunk is tombstoned but still readable
        let old = store
            .get_chunk(DEFAULT_WORKSPACE, &old_chunks[0].id)
            .unwrap();
        assert!(old.deleted_at.is_some());

        // Only the new text is searchable
        let (hits, _) = store.search_chunks(DEFAULT_WORKSPACE, "original", 10).unwrap();
        assert!(hits.is_empty());
        let (hits, _) = store
            .search_chunks(DEFAULT_WORKSPACE, "replacement", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, new_chunks[0].id);
    }

    #[test]
    fn test_forget_chunk() {
        let mut store = store();
        let (_, chunks) = store
            .ingest_artifact(artifact_for("a.txt"), vec![chunk_with("findable words", None)])
            .unwrap();
        store
            .forget_chunk(DEFAULT_WORKSPACE, &chunks[0].id, 77)
            .unwrap();

        let (hits, _) = store.search_chunks(DEFAULT_WORKSPACE, "findable", 10).unwrap();
        assert!(hits.is_empty());
        let row = store.get_chunk(DEFAULT_WORKSPACE, &chunks[0].id).unwrap();
        assert_eq!(row.deleted_at, Some(77));
    }

    #[test]
    fn test_delete_chunks_by_source() {
        let mut store = store();
        store
            .ingest_artifact(
                artifact_for("big.md"),
                vec![chunk_with("alpha text", None), chunk_with("beta text", None)],
            )
            .unwrap();
        let deleted = store
            .delete_chunks_by_source(DEFAULT_WORKSPACE, "big.md", 50)
            .unwrap();
        assert_eq!(deleted, 2);
        let (hits, _) = store.search_chunks(DEFAULT_WORKSPACE, "alpha", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_same_text_same_hash_across_threads() {
        let mut store = store();
        let (_, first) = store
            .ingest_artifact(
                artifact_for("one.md"),
                vec![chunk_with("duplicated body", Some("t1"))],
            )
            .unwrap();
        let (_, second) = store
            .ingest_artifact(
                artifact_for("two.md"),
                vec![chunk_with("duplicated body", Some("t2"))],
            )
            .unwrap();
        assert_eq!(first[0].text_hash, second[0].text_hash);
        assert_ne!(first[0].id, second[0].id);
    }
}
