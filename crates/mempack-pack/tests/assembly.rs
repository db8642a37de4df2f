//! End-to-end assembly scenarios against a real on-disk store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mempack_core::clock::FixedClock;
use mempack_core::error::CoreError;
use mempack_core::model::DEFAULT_WORKSPACE;
use mempack_core::repo::{RepoInfo, RepoResolver};
use mempack_core::tokenizer::BpeTokenizer;
use mempack_pack::{PackAssembler, PackLimits, PackOptions, SearchMode};
use mempack_search::ProviderConfig;
use mempack_store::{NewArtifact, NewChunk, NewMemory, Store};

const REPO_ID: &str = "repo-e2e";
const NOW: i64 = 1_700_000_000;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Resolver whose ancestry answers come from a fixed set.
struct FixedResolver {
    reachable: Vec<String>,
}

impl RepoResolver for FixedResolver {
    fn detect(&self, path: &Path) -> RepoInfo {
        RepoInfo::without_git(REPO_ID, path)
    }
    fn detect_base_strict(&self, _path: &Path) -> Result<RepoInfo, CoreError> {
        Err(CoreError::repo_unresolvable("unused in these tests"))
    }
    fn info_from_cache(
        &self,
        id: &str,
        git_root: &Path,
        head: Option<&str>,
        branch: Option<&str>,
        _refresh_head: bool,
    ) -> RepoInfo {
        RepoInfo {
            id: id.to_string(),
            git_root: git_root.to_path_buf(),
            head: head.map(String::from),
            branch: branch.map(String::from),
            has_git: true,
        }
    }
    fn is_ancestor(&self, _git_root: &Path, candidate: &str, _head: &str) -> bool {
        self.reachable.iter().any(|c| c == candidate)
    }
}

fn git_repo(head: &str) -> RepoInfo {
    RepoInfo {
        id: REPO_ID.to_string(),
        git_root: PathBuf::from("/work/e2e"),
        head: Some(head.to_string()),
        branch: Some("main".to_string()),
        has_git: true,
    }
}

fn assembler(dir: &Path, reachable: &[&str]) -> PackAssembler {
    init_logging();
    PackAssembler::new(
        dir,
        Arc::new(FixedResolver {
            reachable: reachable.iter().map(|s| s.to_string()).collect(),
        }),
        Arc::new(FixedClock::new(NOW)),
        Some(Arc::new(BpeTokenizer::default_encoding().unwrap())),
        &ProviderConfig::none(),
    )
}

fn options_with_repo(repo: RepoInfo) -> PackOptions {
    PackOptions {
        repo_override: Some(repo),
        ..Default::default()
    }
}

fn seed_memory(store: &mut Store, title: &str, summary: &str, at: i64) -> String {
    store
        .add_memory(NewMemory {
            workspace: DEFAULT_WORKSPACE.into(),
            title: title.into(),
            summary: summary.into(),
            created_at: at,
            ..Default::default()
        })
        .unwrap()
        .id
}

#[tokio::test]
async fn deterministic_assembly_bytes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        seed_memory(&mut store, "First", "Initial decision", NOW - 3_600);
    }

    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));
    let first = assembler.assemble_json("decision", &options).await.unwrap();
    let second = assembler.assemble_json("decision", &options).await.unwrap();
    assert_eq!(first, second);
    assert!(first.contains("\"First\""));
}

#[tokio::test]
async fn orphan_memories_hide_and_reappear() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        let reachable_id = store
            .add_memory(NewMemory {
                workspace: DEFAULT_WORKSPACE.into(),
                title: "Reachable note".into(),
                summary: "note recorded at commit A".into(),
                anchor_commit: Some("commit-a".into()),
                created_at: NOW - 3_600,
                ..Default::default()
            })
            .unwrap()
            .id;
        store
            .add_memory(NewMemory {
                workspace: DEFAULT_WORKSPACE.into(),
                title: "Orphan note".into(),
                summary: "note recorded on an abandoned branch".into(),
                anchor_commit: Some("commit-gone".into()),
                created_at: NOW - 3_600,
                ..Default::default()
            })
            .unwrap();
        assert!(!reachable_id.is_empty());
    }

    // Only commit-a is an ancestor of HEAD
    let assembler = assembler(dir.path(), &["commit-a"]);
    let options = options_with_repo(git_repo("head-b"));

    let pack = assembler.assemble("note", &options).await.unwrap();
    let titles: Vec<&str> = pack.memories.iter().map(|m| m.title.as_str()).collect();
    assert!(titles.contains(&"Reachable note"));
    assert!(!titles.contains(&"Orphan note"));

    let with_orphans = PackOptions {
        include_orphans: true,
        ..options
    };
    let pack = assembler.assemble("note", &with_orphans).await.unwrap();
    let titles: Vec<&str> = pack.memories.iter().map(|m| m.title.as_str()).collect();
    assert!(titles.contains(&"Orphan note"));
}

#[tokio::test]
async fn rewrites_are_recorded_and_match() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        seed_memory(
            &mut store,
            "Rollout",
            "the delta-99 rollout is complete",
            NOW - 60,
        );
    }

    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));
    let pack = assembler.assemble("delta99", &options).await.unwrap();

    assert!(pack
        .search_meta
        .rewrites_applied
        .iter()
        .any(|r| r == "delta99 -> delta 99"));
    assert_eq!(pack.search_meta.rewritten_query.as_deref(), Some("delta 99"));
    assert_eq!(pack.memories.len(), 1);
    assert_eq!(pack.memories[0].title, "Rollout");
}

#[tokio::test]
async fn duplicate_chunks_collapse_with_sources() {
    let dir = tempfile::tempdir().unwrap();
    let text = "fn shared_helper() { compute() }";
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        for (source, thread) in [("one/lib.rs", "thread-a"), ("two/lib.rs", "thread-b")] {
            store
                .ingest_artifact(
                    NewArtifact {
                        workspace: DEFAULT_WORKSPACE.into(),
                        kind: "file".into(),
                        source: source.into(),
                        content_hash: "h".into(),
                        created_at: NOW - 120,
                        ..Default::default()
                    },
                    vec![NewChunk {
                        thread_id: Some(thread.into()),
                        locator: format!("file:{source}#L1-L1"),
                        text: text.into(),
                        chunk_type: "function".into(),
                        symbol_name: Some("shared_helper".into()),
                        symbol_kind: Some("function".into()),
                        created_at: NOW - 120,
                        ..Default::default()
                    }],
                )
                .unwrap();
        }
    }

    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));
    let pack = assembler.assemble("shared_helper", &options).await.unwrap();

    assert_eq!(pack.chunks.len(), 1);
    assert_eq!(pack.chunks[0].sources.len(), 2);
    let threads: Vec<_> = pack.chunks[0]
        .sources
        .iter()
        .map(|s| s.thread_id.clone().unwrap())
        .collect();
    assert!(threads.contains(&"thread-a".to_string()));
    assert!(threads.contains(&"thread-b".to_string()));
}

#[tokio::test]
async fn rendered_assembly_attaches_raw_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let text = "fn render_me() { prompt() }";
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        store
            .ingest_artifact(
                NewArtifact {
                    workspace: DEFAULT_WORKSPACE.into(),
                    kind: "file".into(),
                    source: "render.rs".into(),
                    content_hash: "h".into(),
                    created_at: NOW - 60,
                    ..Default::default()
                },
                vec![NewChunk {
                    locator: "file:render.rs#L1-L1".into(),
                    text: text.into(),
                    chunk_type: "function".into(),
                    symbol_name: Some("render_me".into()),
                    symbol_kind: Some("function".into()),
                    created_at: NOW - 60,
                    ..Default::default()
                }],
            )
            .unwrap();
    }

    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));

    let plain = assembler.assemble("render_me", &options).await.unwrap();
    assert!(plain.raw_chunks.is_none());

    let rendered = assembler
        .assemble_rendered("render_me", &options)
        .await
        .unwrap();
    let raw = rendered.raw_chunks.expect("rendered pack carries raw chunks");
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].text, text);
    assert_eq!(raw[0].locator, "file:render.rs#L1-L1");
}

#[tokio::test]
async fn supersession_demotes_old_memory() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        let a = seed_memory(&mut store, "Cache plan", "use redis for caching", NOW - 600);
        let b = seed_memory(
            &mut store,
            "Cache plan v2",
            "use redis for caching with TTLs",
            NOW - 300,
        );
        store
            .supersede_memory(DEFAULT_WORKSPACE, &a, &b, NOW - 200)
            .unwrap();
        (a, b)
    };

    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));
    let pack = assembler.assemble("redis caching", &options).await.unwrap();

    let score_a = pack.memories.iter().find(|m| m.id == a).unwrap().score;
    let score_b = pack.memories.iter().find(|m| m.id == b).unwrap().score;
    assert!(score_b > score_a);
    assert!(score_b - score_a >= 4.5);

    // The chain is visible on the old row and in the link trail
    let store = Store::open(dir.path(), REPO_ID).unwrap();
    let old = store.get_memory(DEFAULT_WORKSPACE, &a).unwrap();
    assert_eq!(old.superseded_by, Some(b.clone()));
    let labels = &pack.links[&b];
    assert!(labels.iter().any(|l| l.rel == "supersedes" && l.to_id == a));
}

#[tokio::test]
async fn pack_respects_token_budget() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        for i in 0..6 {
            seed_memory(
                &mut store,
                &format!("Decision {i}"),
                &format!("decision {i} with a reasonably long summary body repeated {i}"),
                NOW - 60 * i,
            );
        }
        store
            .set_state(
                DEFAULT_WORKSPACE,
                "{\"phase\":\"rollout\",\"owner\":\"platform\"}",
                "test",
                0,
                NOW - 10,
            )
            .unwrap();
    }

    let assembler = assembler(dir.path(), &[]).with_limits(PackLimits {
        token_budget: 60,
        state_max: 20,
        memory_max_each: 12,
        chunk_max_each: 12,
        memories_k: 6,
        chunks_k: 4,
    });
    let options = options_with_repo(git_repo("head-a"));
    let pack = assembler.assemble("decision summary", &options).await.unwrap();

    assert!(!pack.memories.is_empty());
    assert!(pack.budget.used_total <= pack.budget.target_total);
    // Lower-ranked memories were dropped to fit
    assert!(pack.memories.len() < 6);
}

#[tokio::test]
async fn bm25_empty_fallback_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    {
        // Nothing matches lexically; only vectors could answer
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        seed_memory(&mut store, "Unrelated", "completely different topic", NOW - 60);
    }

    init_logging();
    let assembler = PackAssembler::new(
        dir.path(),
        Arc::new(FixedResolver { reachable: vec![] }),
        Arc::new(FixedClock::new(NOW)),
        Some(Arc::new(BpeTokenizer::default_encoding().unwrap())),
        &ProviderConfig::hashed(),
    );
    let options = options_with_repo(git_repo("head-a"));
    let pack = assembler.assemble("zzqx warp flux", &options).await.unwrap();

    assert_eq!(pack.search_meta.fallback_reason.as_deref(), Some("bm25_empty"));
    assert_eq!(pack.search_meta.mode, "hybrid");
    // No vectors are stored, so retrieval degraded to lexical-only
    assert_eq!(pack.search_meta.mode_used, "bm25");
    let status = pack.search_meta.vector_status.unwrap();
    assert!(status.enabled);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn bm25_mode_skips_vector_entirely() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        seed_memory(&mut store, "First", "Initial decision", NOW - 60);
    }

    let assembler = assembler(dir.path(), &[]);
    let options = PackOptions {
        mode: SearchMode::Bm25,
        ..options_with_repo(git_repo("head-a"))
    };
    let pack = assembler.assemble("decision", &options).await.unwrap();
    assert_eq!(pack.search_meta.mode, "bm25");
    assert!(!pack.search_meta.vector_used);
    assert!(pack.search_meta.vector_status.is_none());
}

#[tokio::test]
async fn hybrid_retrieval_after_worker_drains_queue() {
    let dir = tempfile::tempdir().unwrap();
    let model = "hashed-256";
    {
        let mut store = Store::open(dir.path(), REPO_ID).unwrap();
        let id = seed_memory(
            &mut store,
            "Auth approach",
            "sessions use signed cookies",
            NOW - 60,
        );
        store
            .enqueue_embedding(
                DEFAULT_WORKSPACE,
                mempack_core::model::EmbedKind::Memory,
                &id,
                model,
                NOW - 60,
            )
            .unwrap();
    }

    // Drain the queue with a worker sharing the same database file
    let worker_store = Store::open(dir.path(), REPO_ID).unwrap();
    let provider: Arc<dyn mempack_search::EmbeddingProvider> =
        Arc::new(mempack_search::HashedProvider::default());
    let mut worker = mempack_search::EmbeddingWorker::new(
        worker_store,
        Some(provider),
        model,
        Arc::new(FixedClock::new(NOW)),
        mempack_search::WorkerConfig::default(),
    );
    worker.run_once().await.unwrap();
    drop(worker);

    init_logging();
    let assembler = PackAssembler::new(
        dir.path(),
        Arc::new(FixedResolver { reachable: vec![] }),
        Arc::new(FixedClock::new(NOW)),
        Some(Arc::new(BpeTokenizer::default_encoding().unwrap())),
        &ProviderConfig::hashed(),
    );
    let options = PackOptions {
        min_similarity: 0.0,
        ..options_with_repo(git_repo("head-a"))
    };
    let pack = assembler
        .assemble("signed cookies sessions", &options)
        .await
        .unwrap();

    assert!(pack.search_meta.vector_used);
    assert_eq!(pack.search_meta.mode_used, "hybrid");
    assert_eq!(pack.memories.len(), 1);
}

#[tokio::test]
async fn invalid_query_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), &[]);
    let options = options_with_repo(git_repo("head-a"));
    assert!(assembler.assemble("   ", &options).await.is_err());
}
