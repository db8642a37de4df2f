//! Share bundles: exporting memories for teammates and importing theirs
//!
//! A bundle is a directory with `manifest.json`, `memories.jsonl` (one
//! record per line) and a human README. Import maps every source id onto
//! a deterministic local `MSH-…` id, so re-importing an unchanged bundle
//! is a no-op and `replace` can purge records that disappeared at the
//! source.

use std::path::Path;

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use mempack_core::model::EmbedKind;
use mempack_core::{sanitize_tag, shared_import_id};

use crate::error::{Result, StoreError};
use crate::memories::{MemoryUpdate, NewMemory};
use crate::store::Store;

/// Bundle format version.
pub const SHARE_SCHEMA_VERSION: u32 = 1;

/// Tag applied to every imported memory.
pub const SHARED_IMPORT_TAG: &str = "shared_import";

/// `manifest.json` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareManifest {
    pub schema_version: u32,
    pub exported_at: String,
    pub tool_version: String,
    pub source_repo_id: String,
    pub source_git_root: String,
    pub workspace: String,
    pub memory_count: usize,
}

/// One line of `memories.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_commit: Option<String>,
    pub created_at: i64,
}

/// An in-memory bundle (manifest plus records).
#[derive(Debug, Clone, PartialEq)]
pub struct ShareBundle {
    pub manifest: ShareManifest,
    pub records: Vec<ShareRecord>,
}

/// What an import run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub purged: usize,
}

impl Store {
    /// Build a bundle from every active (non-deleted, non-superseded)
    /// memory in the workspace.
    pub fn export_share(
        &self,
        workspace: &str,
        source_git_root: &str,
        tool_version: &str,
        now: i64,
    ) -> Result<ShareBundle> {
        let records: Vec<ShareRecord> = self
            .list_active_memories(workspace)?
            .into_iter()
            .map(|m| ShareRecord {
                source_id: m.id,
                thread_id: m.thread_id,
                title: m.title,
                summary: m.summary,
                tags: m.tags,
                entities: m.entities,
                anchor_commit: m.anchor_commit,
                created_at: m.created_at,
            })
            .collect();

        let exported_at = chrono::DateTime::from_timestamp(now, 0)
            .unwrap_or_default()
            .to_rfc3339();

        Ok(ShareBundle {
            manifest: ShareManifest {
                schema_version: SHARE_SCHEMA_VERSION,
                exported_at,
                tool_version: tool_version.to_string(),
                source_repo_id: self.repo_id().to_string(),
                source_git_root: source_git_root.to_string(),
                workspace: workspace.to_string(),
                memory_count: records.len(),
            },
            records,
        })
    }

    /// Import a bundle into this store.
    ///
    /// Each source id maps to `MSH-<8hex(source_repo_id)>-<sanitized>`;
    /// rows are inserted or updated and tagged `shared_import` plus a
    /// per-source tag. With `replace`, previously imported memories from
    /// the same source that are absent from the bundle are purged.
    /// Importing an unchanged bundle again reports everything unchanged.
    pub fn import_share(
        &mut self,
        bundle: &ShareBundle,
        workspace: &str,
        replace: bool,
        now: i64,
        embed_model: Option<&str>,
    ) -> Result<ImportReport> {
        let source_repo = &bundle.manifest.source_repo_id;
        let source_tag = format!("share_{}", sanitize_tag(source_repo));
        let mut report = ImportReport::default();
        let mut incoming_ids = std::collections::HashSet::new();

        for record in &bundle.records {
            let local_id = shared_import_id(source_repo, &record.source_id);
            incoming_ids.insert(local_id.clone());

            let mut tags = record.tags.clone();
            for tag in [SHARED_IMPORT_TAG, source_tag.as_str()] {
                if !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_string());
                }
            }

            match self.get_memory(workspace, &local_id) {
                Ok(existing) if !existing.is_active() => {
                    // Tombstoned locally; the forget decision wins
                    report.unchanged += 1;
                }
                Ok(existing) => {
                    let same = existing.title == record.title
                        && existing.summary == record.summary
                        && existing.thread_id == record.thread_id
                        && existing.tags == tags
                        && existing.entities == record.entities
                        && existing.anchor_commit == record.anchor_commit;
                    if same {
                        report.unchanged += 1;
                        continue;
                    }
                    self.update_memory(
                        workspace,
                        &local_id,
                        MemoryUpdate {
                            title: Some(record.title.clone()),
                            summary: Some(record.summary.clone()),
                            summary_tokens: Some(0),
                            set_tags: Some(tags),
                            set_entities: Some(record.entities.clone()),
                            ..Default::default()
                        },
                    )?;
                    report.updated += 1;
                    if let Some(model) = embed_model {
                        self.enqueue_embedding(
                            workspace,
                            EmbedKind::Memory,
                            &local_id,
                            model,
                            now,
                        )?;
                    }
                }
                Err(StoreError::MemoryNotFound { .. }) => {
                    self.add_memory(NewMemory {
                        id: Some(local_id.clone()),
                        workspace: workspace.to_string(),
                        thread_id: record.thread_id.clone(),
                        title: record.title.clone(),
                        summary: record.summary.clone(),
                        summary_tokens: 0,
                        tags,
                        entities: record.entities.clone(),
                        anchor_commit: record.anchor_commit.clone(),
                        created_at: record.created_at,
                    })?;
                    report.imported += 1;
                    if let Some(model) = embed_model {
                        self.enqueue_embedding(
                            workspace,
                            EmbedKind::Memory,
                            &local_id,
                            model,
                            now,
                        )?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if replace {
            report.purged = self.purge_stale_imports(workspace, source_repo, &incoming_ids)?;
        }

        info!(
            "share import from {source_repo}: {} imported, {} updated, {} unchanged, {} purged",
            report.imported, report.updated, report.unchanged, report.purged
        );
        Ok(report)
    }

    /// Hard-delete previously imported memories from `source_repo` whose
    /// local ids are not in the incoming set.
    fn purge_stale_imports(
        &mut self,
        workspace: &str,
        source_repo: &str,
        incoming: &std::collections::HashSet<String>,
    ) -> Result<usize> {
        // shared_import_id("<repo>", "") is exactly the id prefix
        let prefix = shared_import_id(source_repo, "");
        let repo_id = self.repo_id().to_string();

        let tx = self.conn_mut().transaction()?;
        let mut stmt = tx.prepare(
            "SELECT id, rowid FROM memories \
             WHERE repo_id = ?1 AND workspace = ?2 AND id LIKE ?3 || '%'",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map(params![repo_id, workspace, prefix], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let mut purged = 0;
        for (id, rowid) in rows {
            if incoming.contains(&id) {
                continue;
            }
            tx.execute("DELETE FROM memories_fts WHERE rowid = ?1", [rowid])?;
            tx.execute(
                "DELETE FROM memories WHERE repo_id = ?1 AND workspace = ?2 AND id = ?3",
                params![repo_id, workspace, id],
            )?;
            purged += 1;
        }
        tx.commit()?;
        Ok(purged)
    }
}

/// Write a bundle to `dir` as `manifest.json` + `memories.jsonl` +
/// `README.md`.
pub fn write_share_bundle(bundle: &ShareBundle, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(&bundle.manifest)?,
    )?;

    let mut lines = String::new();
    for record in &bundle.records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }
    std::fs::write(dir.join("memories.jsonl"), lines)?;

    std::fs::write(
        dir.join("README.md"),
        format!(
            "# Mempack share bundle\n\nExported from `{}` ({} memories).\n\n\
             Import with the mempack share-import operation pointed at this directory.\n",
            bundle.manifest.source_repo_id, bundle.manifest.memory_count
        ),
    )?;
    Ok(())
}

/// Read a bundle directory back into memory.
pub fn read_share_bundle(dir: &Path) -> Result<ShareBundle> {
    let manifest_raw = std::fs::read_to_string(dir.join("manifest.json"))?;
    let manifest: ShareManifest = serde_json::from_str(&manifest_raw)
        .map_err(|e| StoreError::invalid_bundle(format!("manifest.json: {e}")))?;
    if manifest.schema_version != SHARE_SCHEMA_VERSION {
        return Err(StoreError::invalid_bundle(format!(
            "unsupported schema_version {}",
            manifest.schema_version
        )));
    }

    let records_raw = std::fs::read_to_string(dir.join("memories.jsonl"))?;
    let mut records = Vec::new();
    for (lineno, line) in records_raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ShareRecord = serde_json::from_str(line)
            .map_err(|e| StoreError::invalid_bundle(format!("memories.jsonl:{}: {e}", lineno + 1)))?;
        records.push(record);
    }

    Ok(ShareBundle { manifest, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::model::DEFAULT_WORKSPACE;
    use pretty_assertions::assert_eq;

    fn seeded_store() -> Store {
        let mut store = Store::in_memory("source-repo").unwrap();
        for (title, summary, at) in [
            ("Auth decision", "Use session cookies", 100),
            ("Cache decision", "Redis with 1h TTL", 200),
        ] {
            store
                .add_memory(NewMemory {
                    workspace: DEFAULT_WORKSPACE.into(),
                    title: title.into(),
                    summary: summary.into(),
                    created_at: at,
                    ..Default::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_export_skips_deleted_and_superseded() {
        let mut store = seeded_store();
        let extra = store
            .add_memory(NewMemory {
                workspace: DEFAULT_WORKSPACE.into(),
                title: "Gone".into(),
                summary: "soon deleted".into(),
                created_at: 300,
                ..Default::default()
            })
            .unwrap();
        store
            .forget_memory(DEFAULT_WORKSPACE, &extra.id, 400)
            .unwrap();

        let bundle = store
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();
        assert_eq!(bundle.manifest.memory_count, 2);
        assert_eq!(bundle.records.len(), 2);
        assert!(bundle.records.iter().all(|r| r.title != "Gone"));
        assert_eq!(bundle.manifest.source_repo_id, "source-repo");
    }

    #[test]
    fn test_import_is_idempotent() {
        let source = seeded_store();
        let bundle = source
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();

        let mut dest = Store::in_memory("dest-repo").unwrap();
        let first = dest
            .import_share(&bundle, DEFAULT_WORKSPACE, false, 600, None)
            .unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.unchanged, 0);

        let second = dest
            .import_share(&bundle, DEFAULT_WORKSPACE, false, 700, None)
            .unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn test_import_maps_ids_and_tags() {
        let source = seeded_store();
        let bundle = source
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();

        let mut dest = Store::in_memory("dest-repo").unwrap();
        dest.import_share(&bundle, DEFAULT_WORKSPACE, false, 600, None)
            .unwrap();

        let expected_id = shared_import_id("source-repo", &bundle.records[0].source_id);
        let imported = dest.get_memory(DEFAULT_WORKSPACE, &expected_id).unwrap();
        assert!(imported.tags.iter().any(|t| t == SHARED_IMPORT_TAG));
        assert!(imported.tags.iter().any(|t| t.starts_with("share_")));
    }

    #[test]
    fn test_import_update_and_replace_purge() {
        let source = seeded_store();
        let mut bundle = source
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();

        let mut dest = Store::in_memory("dest-repo").unwrap();
        dest.import_share(&bundle, DEFAULT_WORKSPACE, false, 600, None)
            .unwrap();

        // Source edits one record, drops the other
        bundle.records[0].summary = "Use session cookies, rotated daily".into();
        let dropped = bundle.records.remove(1);
        bundle.manifest.memory_count = 1;

        let report = dest
            .import_share(&bundle, DEFAULT_WORKSPACE, true, 700, None)
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.purged, 1);

        let gone_id = shared_import_id("source-repo", &dropped.source_id);
        assert!(matches!(
            dest.get_memory(DEFAULT_WORKSPACE, &gone_id),
            Err(StoreError::MemoryNotFound { .. })
        ));
    }

    #[test]
    fn test_bundle_directory_roundtrip() {
        let source = seeded_store();
        let bundle = source
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        write_share_bundle(&bundle, dir.path()).unwrap();
        assert!(dir.path().join("manifest.json").exists());
        assert!(dir.path().join("memories.jsonl").exists());
        assert!(dir.path().join("README.md").exists());

        let loaded = read_share_bundle(dir.path()).unwrap();
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn test_corrupt_bundle_line_is_rejected() {
        let source = seeded_store();
        let bundle = source
            .export_share(DEFAULT_WORKSPACE, "/work/src", "0.1.0", 500)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_share_bundle(&bundle, dir.path()).unwrap();

        let path = dir.path().join("memories.jsonl");
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        std::fs::write(&path, contents).unwrap();

        let err = read_share_bundle(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBundle { .. }));
    }
}
