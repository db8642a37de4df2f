//! Memory row mutations and lexical search
//!
//! The mutation contract:
//! - `add_memory` inserts a row (generating the id when absent) and its
//!   FTS entry, returning the full row.
//! - `update_memory` applies a partial update, reports whether anything
//!   changed, and rejects deleted rows. `superseded_by` has no update
//!   path here at all; only [`Store::mark_memory_superseded`] writes it,
//!   once.
//! - `forget_memory` tombstones the row and removes search visibility.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use mempack_core::model::{Memory, ThreadInfo};

use crate::error::{Result, StoreError};
use crate::schema::MEMORY_COLUMNS;
use crate::store::{fts_query, timed, SearchStats, Store};

/// Fields for a new memory row.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    /// Caller-supplied id; generated (`M-…`) when None.
    pub id: Option<String>,
    pub workspace: String,
    pub thread_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub summary_tokens: i64,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
    pub anchor_commit: Option<String>,
    pub created_at: i64,
}

/// Partial update for a memory row. Tag/entity lists can be replaced
/// wholesale (`set_*`) or adjusted (`add_*` / `remove_*`).
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub summary_tokens: Option<i64>,
    pub set_tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub set_entities: Option<Vec<String>>,
    pub add_entities: Vec<String>,
    pub remove_entities: Vec<String>,
}

/// One lexical hit: the row plus its raw BM25 score (lower = better).
#[derive(Debug, Clone)]
pub struct MemorySearchHit {
    pub memory: Memory,
    pub bm25: f64,
}

pub(crate) fn json_vec(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        workspace: row.get(2)?,
        thread_id: row.get(3)?,
        title: row.get(4)?,
        summary: row.get(5)?,
        summary_tokens: row.get(6)?,
        tags: json_vec(row, 7)?,
        entities: json_vec(row, 8)?,
        anchor_commit: row.get(9)?,
        superseded_by: row.get(10)?,
        deleted_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl Store {
    /// Insert a memory row and its FTS entry, returning the stored row.
    pub fn add_memory(&mut self, new: NewMemory) -> Result<Memory> {
        let id = new.id.unwrap_or_else(mempack_core::memory_id);
        let tags_json = serde_json::to_string(&new.tags)?;
        let entities_json = serde_json::to_string(&new.entities)?;
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO memories (id, repo_id, workspace, thread_id, title, summary, \
             summary_tokens, tags, entities, anchor_commit, superseded_by, deleted_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, NULL, ?11)",
            params![
                id,
                repo_id,
                new.workspace,
                new.thread_id,
                new.title,
                new.summary,
                new.summary_tokens,
                tags_json,
                entities_json,
                new.anchor_commit,
                new.created_at,
            ],
        )?;
        let rowid = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO memories_fts(rowid, title, summary, tags, entities) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rowid,
                new.title,
                new.summary,
                new.tags.join(" "),
                new.entities.join(" "),
            ],
        )?;
        tx.commit()?;

        debug!("added memory {id}");
        self.get_memory(&new.workspace, &id)
    }

    /// Fetch one memory (tombstoned rows included).
    pub fn get_memory(&self, workspace: &str, id: &str) -> Result<Memory> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3"
        );
        self.conn()
            .query_row(&sql, params![self.repo_id(), workspace, id], row_to_memory)
            .optional()?
            .ok_or_else(|| StoreError::memory_not_found(id))
    }

    /// Fetch several memories by id, preserving input order and skipping
    /// ids that do not exist.
    pub fn get_memories_by_ids(&self, workspace: &str, ids: &[String]) -> Result<Vec<Memory>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_memory(workspace, id) {
                Ok(memory) => out.push(memory),
                Err(StoreError::MemoryNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Apply a partial update. Returns the post-update row and whether
    /// anything actually changed. Deleted rows are rejected.
    pub fn update_memory(
        &mut self,
        workspace: &str,
        id: &str,
        update: MemoryUpdate,
    ) -> Result<(Memory, bool)> {
        let current = self.get_memory(workspace, id)?;
        if !current.is_active() {
            return Err(StoreError::conflict(format!(
                "memory '{id}' is deleted and cannot be updated"
            )));
        }

        let title = update.title.unwrap_or_else(|| current.title.clone());
        let summary = update.summary.unwrap_or_else(|| current.summary.clone());
        let summary_tokens = update.summary_tokens.unwrap_or(current.summary_tokens);
        let tags = apply_list_update(
            &current.tags,
            update.set_tags,
            &update.add_tags,
            &update.remove_tags,
        );
        let entities = apply_list_update(
            &current.entities,
            update.set_entities,
            &update.add_entities,
            &update.remove_entities,
        );

        let changed = title != current.title
            || summary != current.summary
            || summary_tokens != current.summary_tokens
            || tags != current.tags
            || entities != current.entities;
        if !changed {
            return Ok((current, false));
        }

        let tags_json = serde_json::to_string(&tags)?;
        let entities_json = serde_json::to_string(&entities)?;
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE memories SET title = ?1, summary = ?2, summary_tokens = ?3, \
             tags = ?4, entities = ?5 \
             WHERE repo_id = ?6 AND workspace = ?7 AND id = ?8",
            params![
                title,
                summary,
                summary_tokens,
                tags_json,
                entities_json,
                repo_id,
                workspace,
                id,
            ],
        )?;
        let rowid: i64 = tx.query_row(
            "SELECT rowid FROM memories WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3",
            params![repo_id, workspace, id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM memories_fts WHERE rowid = ?1", [rowid])?;
        tx.execute(
            "INSERT INTO memories_fts(rowid, title, summary, tags, entities) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rowid, title, summary, tags.join(" "), entities.join(" ")],
        )?;
        tx.commit()?;

        Ok((self.get_memory(workspace, id)?, true))
    }

    /// Tombstone a memory: sets `deleted_at`, removes search visibility,
    /// keeps the row. A second call is a no-op.
    pub fn forget_memory(&mut self, workspace: &str, id: &str, now: i64) -> Result<()> {
        let current = self.get_memory(workspace, id)?;
        if !current.is_active() {
            return Ok(());
        }
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE memories SET deleted_at = ?1 \
             WHERE repo_id = ?2 AND workspace = ?3 AND id = ?4",
            params![now, repo_id, workspace, id],
        )?;
        let rowid: i64 = tx.query_row(
            "SELECT rowid FROM memories WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3",
            params![repo_id, workspace, id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM memories_fts WHERE rowid = ?1", [rowid])?;
        tx.commit()?;
        Ok(())
    }

    /// Record that `old_id` is replaced by `new_id`. Idempotent when the
    /// same pair is marked again; any other target is a conflict because
    /// `superseded_by` is immutable once set.
    pub fn mark_memory_superseded(
        &mut self,
        workspace: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<()> {
        let old = self.get_memory(workspace, old_id)?;
        // The replacement must exist before the chain is written
        self.get_memory(workspace, new_id)?;

        match old.superseded_by.as_deref() {
            Some(existing) if existing == new_id => return Ok(()),
            Some(existing) => {
                return Err(StoreError::conflict(format!(
                    "memory '{old_id}' is already superseded by '{existing}'"
                )))
            }
            None => {}
        }

        self.conn().execute(
            "UPDATE memories SET superseded_by = ?1 \
             WHERE repo_id = ?2 AND workspace = ?3 AND id = ?4",
            params![new_id, self.repo_id(), workspace, old_id],
        )?;
        Ok(())
    }

    /// BM25-ordered lexical search over active memories.
    pub fn search_memories(
        &self,
        workspace: &str,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<MemorySearchHit>, SearchStats)> {
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
                "SELECT COUNT(*) FROM memories_fts \
                 JOIN memories m ON m.rowid = memories_fts.rowid \
                 WHERE memories_fts MATCH ?1 AND m.repo_id = ?2 AND m.workspace = ?3 \
                   AND m.deleted_at IS NULL",
                params![match_expr, self.repo_id(), workspace],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        });
        stats.candidate_count = candidate_count?;
        stats.candidate_time_ms = candidate_time;

        let sql = format!(
            "SELECT {}, bm25(memories_fts) AS score \
             FROM memories_fts \
             JOIN memories m ON m.rowid = memories_fts.rowid \
             WHERE memories_fts MATCH ?1 AND m.repo_id = ?2 AND m.workspace = ?3 \
               AND m.deleted_at IS NULL \
             ORDER BY score ASC, m.id ASC \
             LIMIT ?4",
            MEMORY_COLUMNS
                .split(", ")
                .map(|c| format!("m.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let (hits, fetch_time) = timed(|| -> Result<Vec<MemorySearchHit>> {
            let mut stmt = self.conn().prepare(&sql)?;
            let rows = stmt.query_map(
                params![match_expr, self.repo_id(), workspace, limit as i64],
                |row| {
                    let memory = row_to_memory(row)?;
                    let bm25: f64 = row.get(13)?;
                    Ok(MemorySearchHit { memory, bm25 })
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

    /// Derive thread summaries lazily: title/tags/created_at come from
    /// the earliest active memory sharing the thread id.
    pub fn list_threads(&self, workspace: &str) -> Result<Vec<ThreadInfo>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE repo_id = ?1 AND workspace = ?2 AND thread_id IS NOT NULL \
               AND deleted_at IS NULL"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![self.repo_id(), workspace], row_to_memory)?;

        let mut by_thread: std::collections::HashMap<String, ThreadInfo> =
            std::collections::HashMap::new();
        let mut earliest: std::collections::HashMap<String, (i64, String)> =
            std::collections::HashMap::new();
        for row in rows {
            let memory = row?;
            let thread_id = memory.thread_id.clone().unwrap_or_default();
            let key = (memory.created_at, memory.id.clone());
            let entry = by_thread
                .entry(thread_id.clone())
                .or_insert_with(|| ThreadInfo {
                    thread_id: thread_id.clone(),
                    title: memory.title.clone(),
                    tags: memory.tags.clone(),
                    created_at: memory.created_at,
                    memory_count: 0,
                });
            entry.memory_count += 1;
            match earliest.get(&thread_id) {
                Some(best) if *best <= key => {}
                _ => {
                    earliest.insert(thread_id.clone(), key);
                    entry.title = memory.title.clone();
                    entry.tags = memory.tags.clone();
                    entry.created_at = memory.created_at;
                }
            }
        }

        let mut threads: Vec<ThreadInfo> = by_thread.into_values().collect();
        threads.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(threads)
    }

    /// All active (non-deleted, non-superseded) memories, id-ordered.
    pub fn list_active_memories(&self, workspace: &str) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE repo_id = ?1 AND workspace = ?2 AND deleted_at IS NULL \
               AND superseded_by IS NULL \
             ORDER BY id ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![self.repo_id(), workspace], row_to_memory)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn apply_list_update(
    current: &[String],
    set: Option<Vec<String>>,
    add: &[String],
    remove: &[String],
) -> Vec<String> {
    let mut out = set.unwrap_or_else(|| current.to_vec());
    for item in add {
        if !out.iter().any(|t| t == item) {
            out.push(item.clone());
        }
    }
    out.retain(|t| !remove.iter().any(|r| r == t));
    out
}
