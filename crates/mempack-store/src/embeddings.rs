//! Embedding storage and the embedding work queue
//!
//! Vectors are write-through: the worker computes them and upserts here,
//! then purges the processed queue ids. Vectors are stored as
//! little-endian f32 blobs; `content_hash` carries the SHA-256 of the
//! text that was embedded so freshness is detectable without re-reading
//! the referent.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use mempack_core::model::{EmbedKind, EmbeddingQueueItem, EmbeddingRecord};

use crate::error::{Result, StoreError};
use crate::schema::EMBEDDING_COLUMNS;
use crate::store::Store;

/// Meta key under which the worker records its last run.
const WORKER_STATUS_KEY: &str = "embedding_worker_status";

/// Diagnostic record the embedding worker persists after each iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub last_run: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub model: String,
}

/// Encode a vector as a little-endian f32 blob.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob back into a vector.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
    let kind_str: String = row.get(2)?;
    let kind = EmbedKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown embed kind '{kind_str}'").into(),
        )
    })?;
    let blob: Vec<u8> = row.get(6)?;
    Ok(EmbeddingRecord {
        repo_id: row.get(0)?,
        workspace: row.get(1)?,
        kind,
        item_id: row.get(3)?,
        model: row.get(4)?,
        content_hash: row.get(5)?,
        vector: blob_to_vector(&blob),
        vector_dim: row.get::<_, i64>(7)? as usize,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Store {
    /// Write-through upsert keyed by
    /// `(repo_id, workspace, kind, item_id, model)`.
    pub fn upsert_embedding(&self, rec: &EmbeddingRecord) -> Result<()> {
        if rec.vector.len() != rec.vector_dim {
            return Err(StoreError::invalid_input(format!(
                "vector length {} does not match declared dim {}",
                rec.vector.len(),
                rec.vector_dim
            )));
        }
        self.conn().execute(
            "INSERT INTO embeddings (repo_id, workspace, kind, item_id, model, content_hash, \
             vector, vector_dim, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(repo_id, workspace, kind, item_id, model) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 vector = excluded.vector, \
                 vector_dim = excluded.vector_dim, \
                 updated_at = excluded.updated_at",
            params![
                self.repo_id(),
                rec.workspace,
                rec.kind.as_str(),
                rec.item_id,
                rec.model,
                rec.content_hash,
                vector_to_blob(&rec.vector),
                rec.vector_dim as i64,
                rec.created_at,
                rec.updated_at,
            ],
        )?;
        Ok(())
    }

    /// All stored vectors for one `(workspace, kind, model)` partition,
    /// item-id-ordered.
    pub fn list_embeddings(
        &self,
        workspace: &str,
        kind: EmbedKind,
        model: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        let sql = format!(
            "SELECT {EMBEDDING_COLUMNS} FROM embeddings \
             WHERE repo_id = ?1 AND workspace = ?2 AND kind = ?3 AND model = ?4 \
             ORDER BY item_id ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![self.repo_id(), workspace, kind.as_str(), model],
            row_to_embedding,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Stored vectors for specific items, in input order; missing items
    /// are skipped.
    pub fn get_embeddings_for_items(
        &self,
        workspace: &str,
        kind: EmbedKind,
        model: &str,
        item_ids: &[String],
    ) -> Result<Vec<EmbeddingRecord>> {
        use rusqlite::OptionalExtension;
        let sql = format!(
            "SELECT {EMBEDDING_COLUMNS} FROM embeddings \
             WHERE repo_id = ?1 AND workspace = ?2 AND kind = ?3 AND model = ?4 AND item_id = ?5"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let mut out = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            let rec = stmt
                .query_row(
                    params![self.repo_id(), workspace, kind.as_str(), model, item_id],
                    row_to_embedding,
                )
                .optional()?;
            if let Some(rec) = rec {
                out.push(rec);
            }
        }
        Ok(out)
    }

    /// Dedup-enqueue an embedding computation. Returns whether a new
    /// queue row was created; an already-pending item stays where it is
    /// (the worker reads the latest text at processing time anyway).
    pub fn enqueue_embedding(
        &self,
        workspace: &str,
        kind: EmbedKind,
        item_id: &str,
        model: &str,
        now: i64,
    ) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO embedding_queue \
             (repo_id, workspace, kind, item_id, model, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![self.repo_id(), workspace, kind.as_str(), item_id, model, now],
        )?;
        Ok(inserted > 0)
    }

    /// Oldest pending queue items for a model, FIFO by `queue_id`.
    pub fn next_queue_batch(&self, model: &str, limit: usize) -> Result<Vec<EmbeddingQueueItem>> {
        let mut stmt = self.conn().prepare(
            "SELECT queue_id, repo_id, workspace, kind, item_id, model, created_at \
             FROM embedding_queue WHERE repo_id = ?1 AND model = ?2 \
             ORDER BY queue_id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![self.repo_id(), model, limit as i64], |row| {
            let kind_str: String = row.get(3)?;
            let kind = EmbedKind::parse(&kind_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown embed kind '{kind_str}'").into(),
                )
            })?;
            Ok(EmbeddingQueueItem {
                queue_id: row.get(0)?,
                repo_id: row.get(1)?,
                workspace: row.get(2)?,
                kind,
                item_id: row.get(4)?,
                model: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Purge processed queue rows in one statement batch.
    pub fn delete_queue_items(&self, queue_ids: &[i64]) -> Result<usize> {
        if queue_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; queue_ids.len()].join(", ");
        let sql = format!("DELETE FROM embedding_queue WHERE queue_id IN ({placeholders})");
        let deleted = self.conn().execute(
            &sql,
            rusqlite::params_from_iter(queue_ids.iter()),
        )?;
        Ok(deleted)
    }

    /// Number of pending queue rows.
    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM embedding_queue WHERE repo_id = ?1",
            [self.repo_id()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read the last persisted worker status.
    pub fn worker_status(&self) -> Result<Option<WorkerStatus>> {
        match self.meta_get(WORKER_STATUS_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist the worker status.
    pub fn set_worker_status(&self, status: &WorkerStatus) -> Result<()> {
        self.meta_set(WORKER_STATUS_KEY, &serde_json::to_string(status)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::model::DEFAULT_WORKSPACE;

    fn record(item_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            repo_id: "repo-test".into(),
            workspace: DEFAULT_WORKSPACE.into(),
            kind: EmbedKind::Memory,
            item_id: item_id.into(),
            model: "test-model".into(),
            content_hash: "hash".into(),
            vector_dim: vector.len(),
            vector,
            created_at: 10,
            updated_at: 10,
        }
    }

    #[test]
    fn test_vector_blob_roundtrip() {
        let vector = vec![0.0_f32, 1.5, -2.25, 1e-7];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }

    #[test]
    fn test_upsert_and_list() {
        let store = Store::in_memory("repo-test").unwrap();
        store.upsert_embedding(&record("M-b", vec![1.0, 0.0])).unwrap();
        store.upsert_embedding(&record("M-a", vec![0.0, 1.0])).unwrap();

        let all = store
            .list_embeddings(DEFAULT_WORKSPACE, EmbedKind::Memory, "test-model")
            .unwrap();
        assert_eq!(all.len(), 2);
        // item-id-ordered
        assert_eq!(all[0].item_id, "M-a");
        assert_eq!(all[1].item_id, "M-b");
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let store = Store::in_memory("repo-test").unwrap();
        store.upsert_embedding(&record("M-a", vec![1.0, 0.0])).unwrap();
        let mut updated = record("M-a", vec![0.5, 0.5]);
        updated.content_hash = "hash2".into();
        updated.updated_at = 20;
        store.upsert_embedding(&updated).unwrap();

        let all = store
            .list_embeddings(DEFAULT_WORKSPACE, EmbedKind::Memory, "test-model")
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content_hash, "hash2");
        assert_eq!(all[0].vector, vec![0.5, 0.5]);
        assert_eq!(all[0].updated_at, 20);
    }

    #[test]
    fn test_dim_mismatch_rejected() {
        let store = Store::in_memory("repo-test").unwrap();
        let mut bad = record("M-a", vec![1.0, 0.0]);
        bad.vector_dim = 3;
        assert!(store.upsert_embedding(&bad).is_err());
    }

    #[test]
    fn test_queue_fifo_and_dedup() {
        let store = Store::in_memory("repo-test").unwrap();
        assert!(store
            .enqueue_embedding(DEFAULT_WORKSPACE, EmbedKind::Memory, "M-1", "m", 1)
            .unwrap());
        assert!(store
            .enqueue_embedding(DEFAULT_WORKSPACE, EmbedKind::Memory, "M-2", "m", 2)
            .unwrap());
        // Repeat enqueue collapses
        assert!(!store
            .enqueue_embedding(DEFAULT_WORKSPACE, EmbedKind::Memory, "M-1", "m", 3)
            .unwrap());
        assert_eq!(store.queue_len().unwrap(), 2);

        let batch = store.next_queue_batch("m", 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].item_id, "M-1");
        assert_eq!(batch[1].item_id, "M-2");
        assert!(batch[0].queue_id < batch[1].queue_id);

        let deleted = store
            .delete_queue_items(&[batch[0].queue_id, batch[1].queue_id])
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.queue_len().unwrap(), 0);
    }

    #[test]
    fn test_queue_filters_by_model() {
        let store = Store::in_memory("repo-test").unwrap();
        store
            .enqueue_embedding(DEFAULT_WORKSPACE, EmbedKind::Memory, "M-1", "model-a", 1)
            .unwrap();
        store
            .enqueue_embedding(DEFAULT_WORKSPACE, EmbedKind::Memory, "M-1", "model-b", 2)
            .unwrap();
        let batch = store.next_queue_batch("model-a", 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].model, "model-a");
    }

    #[test]
    fn test_worker_status_roundtrip() {
        let store = Store::in_memory("repo-test").unwrap();
        assert!(store.worker_status().unwrap().is_none());
        let status = WorkerStatus {
            last_run: 123,
            last_error: Some("provider timeout".into()),
            model: "m".into(),
        };
        store.set_worker_status(&status).unwrap();
        assert_eq!(store.worker_status().unwrap(), Some(status));
    }
}
