//! Context pack assembly
//!
//! The one public retrieval operation: resolve the repo, process the
//! query, gather lexical and vector candidates, rank, pack under the
//! token budget, attach link trails, optionally cluster, dedupe chunk
//! sources, and emit the wire-format pack. The pipeline is linear;
//! non-essential failures (link lookup, clustering) degrade to warnings
//! in `search_meta` instead of failing the call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mempack_core::clock::Clock;
use mempack_core::model::{EmbedKind, Memory, Repo, DEFAULT_WORKSPACE};
use mempack_core::query::QueryProcessor;
use mempack_core::repo::{RepoInfo, RepoResolver};
use mempack_core::tokenizer::Tokenizer;
use mempack_search::{
    rank_chunks, rank_memories, resolve, vector_search, EmbeddingProvider, MemoryRankInputs,
    ProviderConfig, ProviderStatus, RankerConfig, VectorResult, VectorSearchStatus,
};
use mempack_store::Store;

use crate::budget::{self, PackLimits};
use crate::cluster::cluster_by_similarity;
use crate::error::{PackError, Result};
use crate::wire::{
    to_canonical_json, BudgetBlock, ChunkSource, ClusterInfo, ContextPack, LinkLabel, PackChunk,
    PackMemory, RawChunk, RepoBlock, SearchMeta, StateBlock, PACK_RULES, PACK_TOOL, PACK_VERSION,
};

/// Pairwise similarity floor for the optional clustering step.
const CLUSTER_SIMILARITY_THRESHOLD: f64 = 0.75;

/// Most clusters one pack will form.
const MAX_CLUSTERS: usize = 10;

/// Fallback relaxation applied to `min_similarity` when lexical search
/// comes back empty.
const FALLBACK_SIMILARITY_RELAX: f64 = 0.1;

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Bm25,
    #[default]
    Hybrid,
    Vector,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Bm25 => "bm25",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Vector => "vector",
        }
    }
}

/// Per-call assembly options.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub workspace: String,
    /// Path the repo is resolved from when no override is given.
    pub path: PathBuf,
    /// Skip resolver detection entirely.
    pub repo_override: Option<RepoInfo>,
    pub mode: SearchMode,
    /// Keep memories whose anchor commit is unreachable from HEAD.
    pub include_orphans: bool,
    pub cluster: bool,
    pub include_raw_chunks: bool,
    pub min_similarity: f64,
    /// Fail instead of falling back to a repo-less pack.
    pub require_repo: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            workspace: DEFAULT_WORKSPACE.to_string(),
            path: PathBuf::from("."),
            repo_override: None,
            mode: SearchMode::Hybrid,
            include_orphans: false,
            cluster: false,
            include_raw_chunks: false,
            min_similarity: 0.25,
            require_repo: false,
        }
    }
}

/// Builds [`ContextPack`]s. Owns the collaborator handles; opens one
/// store per call.
pub struct PackAssembler {
    store_dir: PathBuf,
    resolver: Arc<dyn RepoResolver>,
    clock: Arc<dyn Clock>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    provider_status: ProviderStatus,
    model: String,
    ranker: RankerConfig,
    limits: PackLimits,
}

impl PackAssembler {
    pub fn new(
        store_dir: impl Into<PathBuf>,
        resolver: Arc<dyn RepoResolver>,
        clock: Arc<dyn Clock>,
        tokenizer: Option<Arc<dyn Tokenizer>>,
        provider_config: &ProviderConfig,
    ) -> Self {
        let model = mempack_search::effective_model(provider_config);
        let (provider, provider_status) = resolve(provider_config);
        Self {
            store_dir: store_dir.into(),
            resolver,
            clock,
            tokenizer,
            provider,
            provider_status,
            model,
            ranker: RankerConfig::default(),
            limits: PackLimits::default(),
        }
    }

    /// Override the pack limits.
    pub fn with_limits(mut self, limits: PackLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the ranking constants.
    pub fn with_ranker(mut self, config: RankerConfig) -> Self {
        self.ranker = config;
        self
    }

    /// The embedding model assembly reads vectors for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Assemble and serialize in one step. The serialized pack is
    /// byte-identical across calls for the same store state and inputs.
    pub async fn assemble_json(&self, query: &str, options: &PackOptions) -> Result<String> {
        let pack = self.assemble(query, options).await?;
        Ok(to_canonical_json(&pack)?)
    }

    /// Assemble with the raw-chunk text block attached, for callers
    /// that render the pack straight into a prompt.
    pub async fn assemble_rendered(
        &self,
        query: &str,
        options: &PackOptions,
    ) -> Result<ContextPack> {
        let rendered = PackOptions {
            include_raw_chunks: true,
            ..options.clone()
        };
        self.assemble(query, &rendered).await
    }

    /// Build a context pack for one query.
    pub async fn assemble(&self, query: &str, options: &PackOptions) -> Result<ContextPack> {
        let workspace = options.workspace.as_str();
        let mut warnings: Vec<String> = Vec::new();

        // 1. Resolve repo, open store, refresh the repo row
        let repo_info = self.resolve_repo(options)?;
        let store = Store::open(&self.store_dir, &repo_info.id)?;
        let now = self.clock.now();
        store.ensure_repo(&Repo {
            repo_id: repo_info.id.clone(),
            git_root: repo_info.git_root.display().to_string(),
            last_head: repo_info.head.clone(),
            last_branch: repo_info.branch.clone(),
            has_git: repo_info.has_git,
            last_seen_at: now,
        })?;

        // 2. Current state
        let state = store.get_state(workspace)?;

        // 3. Query processing
        let q = QueryProcessor::process(query, self.clock.as_ref())?;
        debug!("query {:?} -> {:?} ({:?})", query, q.sanitized, q.intent);

        // 4. Candidate fetch
        let fts_mem_limit = self.limits.memories_k * 5;
        let fts_chunk_limit = self.limits.chunks_k * 5;
        let use_fts = options.mode != SearchMode::Vector;
        let use_vector = options.mode != SearchMode::Bm25;

        let (mem_hits, mem_stats) = if use_fts {
            store.search_memories(workspace, &q.sanitized, fts_mem_limit)?
        } else {
            (Vec::new(), Default::default())
        };
        let (chunk_hits, chunk_stats) = if use_fts {
            store.search_chunks(workspace, &q.sanitized, fts_chunk_limit)?
        } else {
            (Vec::new(), Default::default())
        };

        let mut min_similarity = options.min_similarity;
        let mut vector_mem_limit = fts_mem_limit;
        let mut vector_chunk_limit = fts_chunk_limit;
        let mut fallback_reason: Option<String> = None;

        let mut vector_mems: Vec<VectorResult> = Vec::new();
        let mut vector_chunks: Vec<VectorResult> = Vec::new();
        let mut vector_status: Option<VectorSearchStatus> = None;

        if use_vector {
            // Lexical recall failed entirely: widen the vector net
            if use_fts && mem_hits.is_empty() && chunk_hits.is_empty() {
                min_similarity = (min_similarity - FALLBACK_SIMILARITY_RELAX).max(0.0);
                vector_mem_limit *= 2;
                vector_chunk_limit *= 2;
                fallback_reason = Some("bm25_empty".to_string());
            }

            let (mems, status) = vector_search(
                &store,
                workspace,
                EmbedKind::Memory,
                &self.model,
                self.provider.as_ref(),
                &self.provider_status,
                &q.sanitized,
                vector_mem_limit,
                min_similarity,
            )
            .await?;
            vector_mems = mems;
            vector_status = Some(status);

            let (chunks, _) = vector_search(
                &store,
                workspace,
                EmbedKind::Chunk,
                &self.model,
                self.provider.as_ref(),
                &self.provider_status,
                &q.sanitized,
                vector_chunk_limit,
                min_similarity,
            )
            .await?;
            vector_chunks = chunks;
        }

        // 5. Load referents for vector-only hits (tombstones drop out)
        let fts_mem_ids: HashSet<&str> = mem_hits.iter().map(|h| h.memory.id.as_str()).collect();
        let vector_only_mem_ids: Vec<String> = vector_mems
            .iter()
            .filter(|r| !fts_mem_ids.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        let vector_only_mems: Vec<Memory> = store
            .get_memories_by_ids(workspace, &vector_only_mem_ids)?
            .into_iter()
            .filter(|m| m.is_active())
            .collect();

        let fts_chunk_ids: HashSet<&str> =
            chunk_hits.iter().map(|h| h.chunk.id.as_str()).collect();
        let vector_only_chunk_ids: Vec<String> = vector_chunks
            .iter()
            .filter(|r| !fts_chunk_ids.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        let vector_only_chunks = store
            .get_chunks_by_ids(workspace, &vector_only_chunk_ids)?
            .into_iter()
            .filter(|c| c.is_active())
            .collect();

        let vector_used = !vector_mems.is_empty() || !vector_chunks.is_empty();

        // 6. Rank
        let memory_ranking = rank_memories(
            &self.ranker,
            MemoryRankInputs {
                candidates: mem_hits.into_iter().map(|h| (h.memory, h.bm25)).collect(),
                vector_results: &vector_mems,
                vector_only: vector_only_mems,
                query: &q,
                repo: &repo_info,
                resolver: self.resolver.as_ref(),
                include_orphans: options.include_orphans,
                now,
            },
        );
        let ranked_chunks = rank_chunks(
            &self.ranker,
            chunk_hits.into_iter().map(|h| (h.chunk, h.bm25)).collect(),
            &vector_chunks,
            vector_only_chunks,
            &q,
            &memory_ranking.matched_thread_ids,
            now,
        );

        // 7. Budget
        let packed = budget::pack(
            &self.limits,
            self.tokenizer.as_deref(),
            &state.state_json,
            state.tokens.max(0) as usize,
            memory_ranking.ranked,
            ranked_chunks,
        )?;

        // 8. Link trail
        let mut links: BTreeMap<String, Vec<LinkLabel>> = BTreeMap::new();
        match store.links_from(&packed.included_memory_ids) {
            Ok(rows) => {
                for link in rows {
                    let label = LinkLabel {
                        rel: link.rel,
                        to_id: link.to_id,
                    };
                    let labels = links.entry(link.from_id).or_default();
                    if !labels.contains(&label) {
                        labels.push(label);
                    }
                }
            }
            Err(e) => {
                warn!("link lookup failed: {e}");
                warnings.push(format!("link lookup failed: {e}"));
            }
        }

        // 9. Optional clustering
        let mut cluster_info: HashMap<String, ClusterInfo> = HashMap::new();
        let mut folded_members: HashSet<String> = HashSet::new();
        let mut clusters_formed = 0usize;
        if options.cluster && packed.memories.len() >= 2 {
            match store.get_embeddings_for_items(
                workspace,
                EmbedKind::Memory,
                &self.model,
                &packed.included_memory_ids,
            ) {
                Ok(records) if records.len() == packed.included_memory_ids.len() => {
                    let by_id: HashMap<&str, &Vec<f32>> = records
                        .iter()
                        .map(|r| (r.item_id.as_str(), &r.vector))
                        .collect();
                    let items: Vec<(String, Vec<f32>)> = packed
                        .included_memory_ids
                        .iter()
                        .map(|id| (id.clone(), by_id[id.as_str()].clone()))
                        .collect();
                    let clusters =
                        cluster_by_similarity(&items, CLUSTER_SIMILARITY_THRESHOLD, MAX_CLUSTERS);
                    clusters_formed = clusters.len();
                    for cluster in clusters {
                        for member in cluster.member_ids.iter().skip(1) {
                            folded_members.insert(member.clone());
                        }
                        cluster_info.insert(
                            cluster.representative().to_string(),
                            ClusterInfo {
                                size: cluster.size(),
                                avg_similarity: cluster.avg_similarity,
                                member_ids: cluster.member_ids,
                            },
                        );
                    }
                }
                Ok(_) => {
                    warnings.push(
                        "clustering skipped: embeddings missing for some included memories"
                            .to_string(),
                    );
                }
                Err(e) => {
                    warn!("clustering lookup failed: {e}");
                    warnings.push(format!("clustering skipped: {e}"));
                }
            }
        }

        let memories: Vec<PackMemory> = packed
            .memories
            .iter()
            .filter(|m| !folded_members.contains(&m.ranked.memory.id))
            .map(|m| PackMemory {
                id: m.ranked.memory.id.clone(),
                thread_id: m.ranked.memory.thread_id.clone(),
                title: m.ranked.memory.title.clone(),
                summary: m.summary.clone(),
                tags: m.ranked.memory.tags.clone(),
                entities: m.ranked.memory.entities.clone(),
                anchor_commit: m.ranked.memory.anchor_commit.clone(),
                superseded_by: m.ranked.memory.superseded_by.clone(),
                created_at: m.ranked.memory.created_at,
                score: m.ranked.final_score,
                tokens: m.tokens,
                truncated: m.truncated,
                cluster: cluster_info.remove(&m.ranked.memory.id),
            })
            .collect();

        // 10. Chunk source dedup by text hash
        let mut chunks: Vec<PackChunk> = Vec::new();
        let mut chunk_index_by_hash: HashMap<String, usize> = HashMap::new();
        for c in &packed.chunks {
            let source = ChunkSource {
                chunk_id: c.ranked.chunk.id.clone(),
                thread_id: c.ranked.chunk.thread_id.clone(),
                locator: c.ranked.chunk.locator.clone(),
                artifact_id: c.ranked.chunk.artifact_id.clone(),
                created_at: c.ranked.chunk.created_at,
            };
            match chunk_index_by_hash.get(&c.ranked.chunk.text_hash) {
                Some(&index) => chunks[index].sources.push(source),
                None => {
                    chunk_index_by_hash.insert(c.ranked.chunk.text_hash.clone(), chunks.len());
                    chunks.push(PackChunk {
                        id: c.ranked.chunk.id.clone(),
                        artifact_id: c.ranked.chunk.artifact_id.clone(),
                        thread_id: c.ranked.chunk.thread_id.clone(),
                        locator: c.ranked.chunk.locator.clone(),
                        text: c.text.clone(),
                        chunk_type: c.ranked.chunk.chunk_type.clone(),
                        symbol_name: c.ranked.chunk.symbol_name.clone(),
                        symbol_kind: c.ranked.chunk.symbol_kind.clone(),
                        created_at: c.ranked.chunk.created_at,
                        score: c.ranked.final_score,
                        tokens: c.tokens,
                        truncated: c.truncated,
                        sources: vec![source],
                    });
                }
            }
        }

        let raw_chunks = options.include_raw_chunks.then(|| {
            chunks
                .iter()
                .map(|c| RawChunk {
                    locator: c.locator.clone(),
                    text: c.text.clone(),
                })
                .collect()
        });

        // 11. Emit
        let mode_used = match (options.mode, vector_used) {
            (SearchMode::Vector, _) => "vector",
            (_, true) => "hybrid",
            (_, false) => "bm25",
        };
        let mut rewrites_applied = q.rewrites.clone();
        for rewrite in mem_stats.rewrites.iter().chain(chunk_stats.rewrites.iter()) {
            if !rewrites_applied.contains(rewrite) {
                rewrites_applied.push(rewrite.clone());
            }
        }

        let pack = ContextPack {
            version: PACK_VERSION.to_string(),
            tool: PACK_TOOL.to_string(),
            repo: RepoBlock {
                repo_id: repo_info.id.clone(),
                git_root: repo_info.git_root.display().to_string(),
                head: repo_info.head.clone(),
                branch: repo_info.branch.clone(),
                has_git: repo_info.has_git,
            },
            workspace: workspace.to_string(),
            state: StateBlock {
                state: serde_json::from_str(&packed.state_json)?,
                tokens: packed.state_tokens,
                truncated: packed.state_truncated,
                updated_at: state.updated_at,
            },
            matched_threads: memory_ranking.matched_threads,
            memories,
            chunks,
            raw_chunks,
            links,
            search_meta: SearchMeta {
                query: query.to_string(),
                sanitized_query: q.sanitized.clone(),
                intent: q.intent.as_str().to_string(),
                entities_found: q.entities,
                time_hint: q.time_hint,
                mode: options.mode.as_str().to_string(),
                mode_used: mode_used.to_string(),
                vector_used,
                vector_status,
                rewritten_query: (q.sanitized != query).then(|| q.sanitized.clone()),
                rewrites_applied,
                fallback_reason,
                clusters_formed,
                warnings,
            },
            rules: PACK_RULES.iter().map(|r| r.to_string()).collect(),
            budget: BudgetBlock {
                tokenizer: self
                    .tokenizer
                    .as_ref()
                    .map(|t| t.encoding().to_string())
                    .unwrap_or_default(),
                target_total: self.limits.token_budget,
                used_total: packed.used_tokens,
            },
        };

        info!(
            "assembled pack for {:?}: {} memories, {} chunks, {} tokens",
            query,
            pack.memories.len(),
            pack.chunks.len(),
            pack.budget.used_total
        );
        Ok(pack)
    }

    fn resolve_repo(&self, options: &PackOptions) -> Result<RepoInfo> {
        if let Some(info) = &options.repo_override {
            return Ok(info.clone());
        }
        if options.require_repo {
            self.resolver
                .detect_base_strict(&options.path)
                .map_err(|_| PackError::repo_unresolvable(options.path.display().to_string()))
        } else {
            Ok(self.resolver.detect(&options.path))
        }
    }
}
