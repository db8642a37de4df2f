//! Per-workspace state document
//!
//! One *current* JSON document per `(repo_id, workspace)` plus an
//! append-only history. The current document is always valid JSON: a
//! caller that writes something unparseable gets it wrapped as
//! `{"raw": "<original>"}`. Current and history are written in one
//! transaction.

use rusqlite::{params, OptionalExtension};

use mempack_core::model::{StateCurrent, StateHistoryEntry};

use crate::error::Result;
use crate::store::Store;

/// Wrap non-JSON input so the stored state stays parseable.
pub fn normalize_state_json(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return trimmed.to_string();
    }
    serde_json::json!({ "raw": trimmed }).to_string()
}

impl Store {
    /// Current state for a workspace; an empty default when none was
    /// ever written.
    pub fn get_state(&self, workspace: &str) -> Result<StateCurrent> {
        let row = self
            .conn()
            .query_row(
                "SELECT state_json, tokens, updated_at FROM state_current \
                 WHERE repo_id = ?1 AND workspace = ?2",
                params![self.repo_id(), workspace],
                |row| {
                    Ok(StateCurrent {
                        state_json: row.get(0)?,
                        tokens: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    /// Replace the current state and append a history record atomically.
    /// Returns the stored (normalized) state.
    pub fn set_state(
        &mut self,
        workspace: &str,
        raw_json: &str,
        reason: &str,
        tokens: i64,
        now: i64,
    ) -> Result<StateCurrent> {
        let normalized = normalize_state_json(raw_json);
        let history_id = mempack_core::state_id();
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO state_current (repo_id, workspace, state_json, tokens, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(repo_id, workspace) DO UPDATE SET \
                 state_json = excluded.state_json, \
                 tokens = excluded.tokens, \
                 updated_at = excluded.updated_at",
            params![repo_id, workspace, normalized, tokens, now],
        )?;
        tx.execute(
            "INSERT INTO state_history (id, repo_id, workspace, state_json, reason, tokens, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![history_id, repo_id, workspace, normalized, reason, tokens, now],
        )?;
        tx.commit()?;

        Ok(StateCurrent {
            state_json: normalized,
            tokens,
            updated_at: now,
        })
    }

    /// Most recent history entries, newest first.
    pub fn list_state_history(
        &self,
        workspace: &str,
        limit: usize,
    ) -> Result<Vec<StateHistoryEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, state_json, reason, tokens, created_at FROM state_history \
             WHERE repo_id = ?1 AND workspace = ?2 \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![self.repo_id(), workspace, limit as i64],
            |row| {
                Ok(StateHistoryEntry {
                    id: row.get(0)?,
                    state_json: row.get(1)?,
                    reason: row.get(2)?,
                    tokens: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::model::DEFAULT_WORKSPACE;

    #[test]
    fn test_normalize_state_json() {
        assert_eq!(normalize_state_json(""), "{}");
        assert_eq!(normalize_state_json("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(
            normalize_state_json("not json at all"),
            "{\"raw\":\"not json at all\"}"
        );
    }

    #[test]
    fn test_get_state_default() {
        let store = Store::in_memory("r").unwrap();
        let state = store.get_state(DEFAULT_WORKSPACE).unwrap();
        assert_eq!(state.state_json, "{}");
        assert_eq!(state.tokens, 0);
    }

    #[test]
    fn test_set_state_writes_current_and_history() {
        let mut store = Store::in_memory("r").unwrap();
        store
            .set_state(DEFAULT_WORKSPACE, "{\"phase\":1}", "start", 4, 100)
            .unwrap();
        store
            .set_state(DEFAULT_WORKSPACE, "{\"phase\":2}", "advance", 4, 200)
            .unwrap();

        let current = store.get_state(DEFAULT_WORKSPACE).unwrap();
        assert_eq!(current.state_json, "{\"phase\":2}");
        assert_eq!(current.updated_at, 200);

        let history = store.list_state_history(DEFAULT_WORKSPACE, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reason, "advance");
        assert_eq!(history[1].reason, "start");
    }

    #[test]
    fn test_invalid_json_is_wrapped() {
        let mut store = Store::in_memory("r").unwrap();
        let stored = store
            .set_state(DEFAULT_WORKSPACE, "plain words", "note", 0, 50)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&stored.state_json).unwrap();
        assert_eq!(value["raw"], "plain words");
    }
}
