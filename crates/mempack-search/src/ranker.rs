//! Candidate fusion and ordering
//!
//! Fuses lexical (BM25) and vector candidates with reciprocal rank
//! fusion, then layers recency and thread bonuses and safety,
//! time-hint and supersession penalties on top. Memories additionally
//! pass through a git-reachability orphan filter. The ranker is pure
//! CPU work except for the bounded ancestry probes.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use mempack_core::model::{Chunk, Memory};
use mempack_core::query::ProcessedQuery;
use mempack_core::repo::{RepoInfo, RepoResolver};

use crate::vector::VectorResult;

/// Phrases whose presence marks an item as a prompt-injection risk.
/// Checked case-insensitively as substrings.
pub const INJECTION_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous instructions",
    "disregard prior instructions",
    "you are now",
    "system prompt:",
    "developer message:",
    "do not follow the above",
];

/// Ranking constants. Defaults follow the standard RRF parameterization
/// (k = 60) with the fused score scaled back into unit-ish range.
#[derive(Debug, Clone, Copy)]
pub struct RankerConfig {
    pub rrf_k: f64,
    pub rrf_weight: f64,
    pub recency_coeff: f64,
    pub recency_decay_days: f64,
    pub thread_bonus: f64,
    pub safety_penalty: f64,
    pub time_hint_penalty: f64,
    pub supersession_penalty: f64,
    /// Hard cap on ancestry probes per ranking pass; candidates past it
    /// count as reachable.
    pub max_orphan_checks: usize,
    pub max_matched_threads: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            rrf_weight: 60.0,
            recency_coeff: 0.15,
            recency_decay_days: 14.0,
            thread_bonus: 0.10,
            safety_penalty: -100.0,
            time_hint_penalty: -2.0,
            supersession_penalty: -5.0,
            max_orphan_checks: 200,
            max_matched_threads: 3,
        }
    }
}

/// Reciprocal rank fusion term: `1/(k + rank)` for a 1-based rank, 0
/// for items absent from the list.
pub fn rrf(rank: usize, k: f64) -> f64 {
    if rank == 0 {
        0.0
    } else {
        1.0 / (k + rank as f64)
    }
}

/// A memory with its full score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMemory {
    pub memory: Memory,
    pub fts_rank: usize,
    pub fts_score: f64,
    pub vector_rank: usize,
    pub vector_score: f64,
    pub rrf_score: f64,
    pub recency_bonus: f64,
    pub thread_bonus: f64,
    pub safety_penalty: f64,
    pub final_score: f64,
}

/// A chunk with its full score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub fts_rank: usize,
    pub fts_score: f64,
    pub vector_rank: usize,
    pub vector_score: f64,
    pub rrf_score: f64,
    pub recency_bonus: f64,
    pub thread_bonus: f64,
    pub safety_penalty: f64,
    pub final_score: f64,
}

/// A thread the ranking pass declared relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedThread {
    pub thread_id: String,
    pub reason: String,
    pub memory_count: usize,
}

/// Timings and counters from one ranking pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingStats {
    pub reachability_checks: usize,
    pub orphans_dropped: usize,
    pub orphan_filter_ms: f64,
    pub thread_match_ms: f64,
}

/// Output of [`rank_memories`].
#[derive(Debug, Clone)]
pub struct MemoryRanking {
    pub ranked: Vec<RankedMemory>,
    pub matched_threads: Vec<MatchedThread>,
    pub matched_thread_ids: Vec<String>,
    pub stats: RankingStats,
}

/// Everything the memory ranking pass needs.
pub struct MemoryRankInputs<'a> {
    /// Lexical candidates in BM25 order, with their raw scores.
    pub candidates: Vec<(Memory, f64)>,
    /// Vector candidates already filtered by the similarity floor.
    pub vector_results: &'a [VectorResult],
    /// Referents of vector hits that were not in the lexical list.
    pub vector_only: Vec<Memory>,
    pub query: &'a ProcessedQuery,
    pub repo: &'a RepoInfo,
    pub resolver: &'a dyn RepoResolver,
    pub include_orphans: bool,
    pub now: i64,
}

/// Rank memory candidates.
pub fn rank_memories(config: &RankerConfig, inputs: MemoryRankInputs<'_>) -> MemoryRanking {
    let mut stats = RankingStats::default();

    // Rank maps from the two candidate lists (1-based)
    let fts_ranks: HashMap<String, (usize, f64)> = inputs
        .candidates
        .iter()
        .enumerate()
        .map(|(i, (m, bm25))| (m.id.clone(), (i + 1, *bm25)))
        .collect();
    let vector_ranks: HashMap<String, (usize, f64)> = inputs
        .vector_results
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), (i + 1, r.score)))
        .collect();

    // Combined candidate pool, lexical first, vector-only appended
    let mut pool: Vec<Memory> = inputs.candidates.into_iter().map(|(m, _)| m).collect();
    let seen: HashSet<String> = pool.iter().map(|m| m.id.clone()).collect();
    for memory in inputs.vector_only {
        if !seen.contains(&memory.id) {
            pool.push(memory);
        }
    }

    // Orphan filter: drop memories anchored to commits no longer
    // reachable from HEAD
    let orphan_start = Instant::now();
    if inputs.repo.has_git && !inputs.include_orphans {
        if let Some(head) = inputs.repo.head.clone() {
            let mut reachable_cache: HashMap<String, bool> = HashMap::new();
            let before = pool.len();
            pool.retain(|memory| {
                let commit = match &memory.anchor_commit {
                    Some(c) => c.clone(),
                    None => return true,
                };
                if let Some(reachable) = reachable_cache.get(&commit) {
                    return *reachable;
                }
                if stats.reachability_checks >= config.max_orphan_checks {
                    // Budget exhausted: untested candidates pass
                    return true;
                }
                stats.reachability_checks += 1;
                let reachable =
                    inputs
                        .resolver
                        .is_ancestor(&inputs.repo.git_root, &commit, &head);
                reachable_cache.insert(commit, reachable);
                reachable
            });
            stats.orphans_dropped = before - pool.len();
        }
    }
    stats.orphan_filter_ms = orphan_start.elapsed().as_secs_f64() * 1000.0;

    // Thread matching over the filtered pool
    let thread_start = Instant::now();
    let (matched_threads, matched_thread_ids) = match_threads(config, &pool, inputs.query);
    stats.thread_match_ms = thread_start.elapsed().as_secs_f64() * 1000.0;

    let matched: HashSet<&str> = matched_thread_ids.iter().map(|s| s.as_str()).collect();
    let mut ranked: Vec<RankedMemory> = pool
        .into_iter()
        .map(|memory| {
            let (fts_rank, bm25) = fts_ranks
                .get(&memory.id)
                .copied()
                .unwrap_or((0, 0.0));
            let (vector_rank, vector_score) = vector_ranks
                .get(&memory.id)
                .copied()
                .unwrap_or((0, 0.0));

            let rrf_score =
                (rrf(fts_rank, config.rrf_k) + rrf(vector_rank, config.rrf_k)) * config.rrf_weight;
            let recency_bonus =
                recency_bonus(config, memory.created_at, inputs.now, inputs.query.boost_recency);
            let thread_bonus = memory
                .thread_id
                .as_deref()
                .filter(|t| matched.contains(t))
                .map(|_| config.thread_bonus)
                .unwrap_or(0.0);
            let safety_penalty =
                if contains_injection(&memory.title) || contains_injection(&memory.summary) {
                    config.safety_penalty
                } else {
                    0.0
                };

            let mut final_score = rrf_score + recency_bonus + thread_bonus + safety_penalty;
            if let Some(after) = inputs.query.time_hint {
                if memory.created_at < after {
                    final_score += config.time_hint_penalty;
                }
            }
            if memory.is_superseded() {
                final_score += config.supersession_penalty;
            }

            RankedMemory {
                fts_rank,
                fts_score: -bm25,
                vector_rank,
                vector_score,
                rrf_score,
                recency_bonus,
                thread_bonus,
                safety_penalty,
                final_score,
                memory,
            }
        })
        .collect();

    sort_ranked(&mut ranked, |r| {
        (r.final_score, r.memory.created_at, r.memory.id.clone())
    });

    debug!(
        "ranked {} memories ({} reachability checks, {} orphans dropped)",
        ranked.len(),
        stats.reachability_checks,
        stats.orphans_dropped
    );

    MemoryRanking {
        ranked,
        matched_threads,
        matched_thread_ids,
        stats,
    }
}

/// Rank chunk candidates: same fusion recipe as memories minus the
/// orphan filter and supersession penalty. Thread bonuses reuse the
/// thread ids the memory pass matched.
pub fn rank_chunks(
    config: &RankerConfig,
    candidates: Vec<(Chunk, f64)>,
    vector_results: &[VectorResult],
    vector_only: Vec<Chunk>,
    query: &ProcessedQuery,
    matched_thread_ids: &[String],
    now: i64,
) -> Vec<RankedChunk> {
    let fts_ranks: HashMap<String, (usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, (c, bm25))| (c.id.clone(), (i + 1, *bm25)))
        .collect();
    let vector_ranks: HashMap<String, (usize, f64)> = vector_results
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), (i + 1, r.score)))
        .collect();

    let mut pool: Vec<Chunk> = candidates.into_iter().map(|(c, _)| c).collect();
    let seen: HashSet<String> = pool.iter().map(|c| c.id.clone()).collect();
    for chunk in vector_only {
        if !seen.contains(&chunk.id) {
            pool.push(chunk);
        }
    }

    let matched: HashSet<&str> = matched_thread_ids.iter().map(|s| s.as_str()).collect();
    let mut ranked: Vec<RankedChunk> = pool
        .into_iter()
        .map(|chunk| {
            let (fts_rank, bm25) = fts_ranks.get(&chunk.id).copied().unwrap_or((0, 0.0));
            let (vector_rank, vector_score) =
                vector_ranks.get(&chunk.id).copied().unwrap_or((0, 0.0));

            let rrf_score =
                (rrf(fts_rank, config.rrf_k) + rrf(vector_rank, config.rrf_k)) * config.rrf_weight;
            let recency_bonus = recency_bonus(config, chunk.created_at, now, query.boost_recency);
            let thread_bonus = chunk
                .thread_id
                .as_deref()
                .filter(|t| matched.contains(t))
                .map(|_| config.thread_bonus)
                .unwrap_or(0.0);
            let safety_penalty = if contains_injection(&chunk.text) {
                config.safety_penalty
            } else {
                0.0
            };

            let mut final_score = rrf_score + recency_bonus + thread_bonus + safety_penalty;
            if let Some(after) = query.time_hint {
                if chunk.created_at < after {
                    final_score += config.time_hint_penalty;
                }
            }

            RankedChunk {
                fts_rank,
                fts_score: -bm25,
                vector_rank,
                vector_score,
                rrf_score,
                recency_bonus,
                thread_bonus,
                safety_penalty,
                final_score,
                chunk,
            }
        })
        .collect();

    sort_ranked(&mut ranked, |r| {
        (r.final_score, r.chunk.created_at, r.chunk.id.clone())
    });
    ranked
}

/// Exponential recency bonus. Items with an epoch-zero `created_at`
/// (bulk imports with no provenance) get none.
fn recency_bonus(config: &RankerConfig, created_at: i64, now: i64, boost: f64) -> f64 {
    if created_at == 0 {
        return 0.0;
    }
    let age_days = ((now - created_at).max(0) as f64) / 86_400.0;
    config.recency_coeff * (-age_days / config.recency_decay_days).exp() * boost
}

/// Case-insensitive injection-phrase scan.
pub fn contains_injection(text: &str) -> bool {
    let lower = text.to_lowercase();
    INJECTION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Stable sort: score descending, then created_at descending, then id
/// ascending.
fn sort_ranked<T, K: Fn(&T) -> (f64, i64, String)>(items: &mut [T], key: K) {
    items.sort_by(|a, b| {
        let (score_a, created_a, id_a) = key(a);
        let (score_b, created_b, id_b) = key(b);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| created_b.cmp(&created_a))
            .then_with(|| id_a.cmp(&id_b))
    });
}

/// Declare up to `max_matched_threads` threads relevant: the highest
/// memory counts win (ties broken by thread id), and any thread whose id
/// substring-matches the lowercased query is matched as well.
fn match_threads(
    config: &RankerConfig,
    pool: &[Memory],
    query: &ProcessedQuery,
) -> (Vec<MatchedThread>, Vec<String>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for memory in pool {
        if let Some(thread) = memory.thread_id.as_deref() {
            *counts.entry(thread).or_insert(0) += 1;
        }
    }

    let mut by_count: Vec<(&str, usize)> = counts.iter().map(|(t, c)| (*t, *c)).collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let query_lower = query.sanitized.to_lowercase();
    let mut matched = Vec::new();
    let mut matched_ids = Vec::new();

    for (thread_id, count) in by_count.iter().take(config.max_matched_threads) {
        let reason = if query_lower.contains(&thread_id.to_lowercase()) {
            "query matched thread id"
        } else {
            "top retrieved thread"
        };
        matched.push(MatchedThread {
            thread_id: thread_id.to_string(),
            reason: reason.to_string(),
            memory_count: *count,
        });
        matched_ids.push(thread_id.to_string());
    }

    // Query-named threads are matched even when outside the top counts
    for (thread_id, count) in by_count.iter().skip(config.max_matched_threads) {
        if query_lower.contains(&thread_id.to_lowercase()) {
            matched.push(MatchedThread {
                thread_id: thread_id.to_string(),
                reason: "query matched thread id".to_string(),
                memory_count: *count,
            });
            matched_ids.push(thread_id.to_string());
        }
    }

    (matched, matched_ids)
}
