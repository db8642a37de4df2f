//! Item-to-item links
//!
//! Links are flat rows keyed by `(from_id, rel, to_id)`; no in-memory
//! graph is ever built. `add_link` validates endpoint liveness; the
//! supersession pair is written by [`Store::supersede_memory`], which
//! bypasses that validation because the old side is by definition
//! superseded.

use rusqlite::params;

use mempack_core::model::{Link, REL_SUPERSEDED_BY, REL_SUPERSEDES};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// Insert a link. Self-links are rejected, as are links whose
    /// endpoints are missing, soft-deleted, or superseded. Duplicate
    /// `(from, rel, to)` inserts are idempotent; returns whether a new
    /// row was written.
    pub fn add_link(
        &mut self,
        workspace: &str,
        from_id: &str,
        rel: &str,
        to_id: &str,
        weight: f64,
        now: i64,
    ) -> Result<bool> {
        if from_id == to_id {
            return Err(StoreError::conflict(format!(
                "self-link on '{from_id}' is not allowed"
            )));
        }
        self.check_link_endpoint(workspace, from_id)?;
        self.check_link_endpoint(workspace, to_id)?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO links (from_id, rel, to_id, weight, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![from_id, rel, to_id, weight, now],
        )?;
        Ok(inserted > 0)
    }

    /// Mark `old_id` superseded by `new_id` and write the symmetric link
    /// pair in one transaction.
    pub fn supersede_memory(
        &mut self,
        workspace: &str,
        old_id: &str,
        new_id: &str,
        now: i64,
    ) -> Result<()> {
        self.mark_memory_superseded(workspace, old_id, new_id)?;
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO links (from_id, rel, to_id, weight, created_at) \
             VALUES (?1, ?2, ?3, 1.0, ?4)",
            params![old_id, REL_SUPERSEDED_BY, new_id, now],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO links (from_id, rel, to_id, weight, created_at) \
             VALUES (?1, ?2, ?3, 1.0, ?4)",
            params![new_id, REL_SUPERSEDES, old_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Outgoing links for a set of ids, in deterministic
    /// `(from, rel, to)` order.
    pub fn links_from(&self, ids: &[String]) -> Result<Vec<Link>> {
        let mut out = Vec::new();
        let mut stmt = self.conn().prepare(
            "SELECT from_id, rel, to_id, weight, created_at FROM links \
             WHERE from_id = ?1 ORDER BY rel ASC, to_id ASC",
        )?;
        for id in ids {
            let rows = stmt.query_map([id], |row| {
                Ok(Link {
                    from_id: row.get(0)?,
                    rel: row.get(1)?,
                    to_id: row.get(2)?,
                    weight: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// A link endpoint must exist and be live (not deleted, and for
    /// memories not superseded).
    fn check_link_endpoint(&self, workspace: &str, id: &str) -> Result<()> {
        if let Ok(memory) = self.get_memory(workspace, id) {
            if !memory.is_active() {
                return Err(StoreError::conflict(format!(
                    "link endpoint '{id}' is deleted"
                )));
            }
            if memory.is_superseded() {
                return Err(StoreError::conflict(format!(
                    "link endpoint '{id}' is superseded"
                )));
            }
            return Ok(());
        }
        match self.get_chunk(workspace, id) {
            Ok(chunk) if !chunk.is_active() => Err(StoreError::conflict(format!(
                "link endpoint '{id}' is deleted"
            ))),
            Ok(_) => Ok(()),
            Err(StoreError::ChunkNotFound { .. }) => Err(StoreError::invalid_input(format!(
                "link endpoint '{id}' does not exist"
            ))),
            Err(e) => Err(e),
        }
    }
}
