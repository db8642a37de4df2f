//! Token-budgeted packing
//!
//! Takes the ranked candidates and squeezes them under a single token
//! budget: the state document is normalized and truncated first, each
//! kept item is clamped to its per-item maximum, and then whole items
//! are dropped lowest-score-first until the pack fits. The packer only
//! touches the tokenizer on paths that genuinely need a count, so packs
//! built entirely from precomputed counts work without one.

use serde::Serialize;
use tracing::debug;

use mempack_core::error::CoreError;
use mempack_core::tokenizer::Tokenizer;
use mempack_search::{RankedChunk, RankedMemory};
use mempack_store::normalize_state_json;

use crate::error::Result;

/// Pack size limits, all in tokens except the `*_k` counts.
#[derive(Debug, Clone, Copy)]
pub struct PackLimits {
    /// Budget for the whole pack (state + items).
    pub token_budget: usize,
    /// Budget for the state document.
    pub state_max: usize,
    /// Per-memory summary budget.
    pub memory_max_each: usize,
    /// Per-chunk text budget.
    pub chunk_max_each: usize,
    /// How many ranked memories to consider.
    pub memories_k: usize,
    /// How many ranked chunks to consider.
    pub chunks_k: usize,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            state_max: 600,
            memory_max_each: 200,
            chunk_max_each: 400,
            memories_k: 8,
            chunks_k: 8,
        }
    }
}

/// A memory that survived packing, with its effective body and count.
#[derive(Debug, Clone, Serialize)]
pub struct PackedMemory {
    pub ranked: RankedMemory,
    /// Summary after per-item truncation.
    pub summary: String,
    pub tokens: usize,
    pub truncated: bool,
}

/// A chunk that survived packing, with its effective body and count.
#[derive(Debug, Clone, Serialize)]
pub struct PackedChunk {
    pub ranked: RankedChunk,
    /// Text after per-item truncation.
    pub text: String,
    pub tokens: usize,
    pub truncated: bool,
}

/// Result of one packing pass.
#[derive(Debug, Clone)]
pub struct BudgetResult {
    pub state_json: String,
    pub state_tokens: usize,
    pub state_truncated: bool,
    pub memories: Vec<PackedMemory>,
    pub chunks: Vec<PackedChunk>,
    pub used_tokens: usize,
    pub included_memory_ids: Vec<String>,
    pub included_chunk_ids: Vec<String>,
}

/// Tokenizer handle the packer resolves lazily: counts that were stored
/// at write time never touch it.
struct DeferredTokenizer<'a> {
    tokenizer: Option<&'a dyn Tokenizer>,
}

impl<'a> DeferredTokenizer<'a> {
    fn require(&self) -> std::result::Result<&'a dyn Tokenizer, CoreError> {
        self.tokenizer.ok_or_else(|| {
            CoreError::tokenizer_unavailable("<unset>", "packing needed a token count")
        })
    }

    fn count(&self, text: &str) -> std::result::Result<usize, CoreError> {
        Ok(self.require()?.count(text))
    }

    fn truncate(
        &self,
        text: &str,
        max: usize,
    ) -> std::result::Result<(String, usize), CoreError> {
        Ok(self.require()?.truncate(text, max))
    }
}

/// Entry in the global drop list.
#[derive(Debug, Clone)]
struct DropEntry {
    is_memory: bool,
    index: usize,
    tokens: usize,
    score: f64,
    created_at: i64,
    id: String,
}

/// Pack ranked candidates under the configured budget.
///
/// `state_stored_tokens` is the count persisted alongside the state (0 =
/// unknown). The state alone may consume the whole budget; whenever at
/// least one item is kept, `used_tokens <= token_budget` holds.
pub fn pack(
    limits: &PackLimits,
    tokenizer: Option<&dyn Tokenizer>,
    raw_state: &str,
    state_stored_tokens: usize,
    memories: Vec<RankedMemory>,
    chunks: Vec<RankedChunk>,
) -> Result<BudgetResult> {
    let tok = DeferredTokenizer { tokenizer };

    // State normalization and truncation
    let (state_json, state_tokens, state_truncated) =
        pack_state(limits, &tok, raw_state, state_stored_tokens)?;

    // Per-item truncation over the top-k of each kind
    let mut packed_memories = Vec::new();
    for ranked in memories.into_iter().take(limits.memories_k) {
        let stored = ranked.memory.summary_tokens.max(0) as usize;
        let tokens = if stored > 0 {
            stored
        } else {
            tok.count(&ranked.memory.summary)?
        };
        let (summary, tokens, truncated) = if tokens > limits.memory_max_each {
            if limits.memory_max_each == 0 {
                (String::new(), 0, true)
            } else {
                let (text, count) =
                    tok.truncate(&ranked.memory.summary, limits.memory_max_each)?;
                (text, count, true)
            }
        } else {
            (ranked.memory.summary.clone(), tokens, false)
        };
        packed_memories.push(PackedMemory {
            ranked,
            summary,
            tokens,
            truncated,
        });
    }

    let mut packed_chunks = Vec::new();
    for ranked in chunks.into_iter().take(limits.chunks_k) {
        let stored = ranked.chunk.text_tokens.max(0) as usize;
        let tokens = if stored > 0 {
            stored
        } else {
            tok.count(&ranked.chunk.text)?
        };
        let (text, tokens, truncated) = if tokens > limits.chunk_max_each {
            if limits.chunk_max_each == 0 {
                (String::new(), 0, true)
            } else {
                let (text, count) = tok.truncate(&ranked.chunk.text, limits.chunk_max_each)?;
                (text, count, true)
            }
        } else {
            (ranked.chunk.text.clone(), tokens, false)
        };
        packed_chunks.push(PackedChunk {
            ranked,
            text,
            tokens,
            truncated,
        });
    }

    // Global drop: lowest score goes first until the pack fits. The
    // empty-object state renders as "{}" and costs the pack nothing;
    // its nominal 2 tokens stay out of the accounting.
    let state_used = if state_json == "{}" { 0 } else { state_tokens };
    let mut used: usize = state_used
        + packed_memories.iter().map(|m| m.tokens).sum::<usize>()
        + packed_chunks.iter().map(|c| c.tokens).sum::<usize>();

    if used > limits.token_budget {
        let mut entries: Vec<DropEntry> = Vec::new();
        for (index, m) in packed_memories.iter().enumerate() {
            entries.push(DropEntry {
                is_memory: true,
                index,
                tokens: m.tokens,
                score: m.ranked.final_score,
                created_at: m.ranked.memory.created_at,
                id: m.ranked.memory.id.clone(),
            });
        }
        for (index, c) in packed_chunks.iter().enumerate() {
            entries.push(DropEntry {
                is_memory: false,
                index,
                tokens: c.tokens,
                score: c.ranked.final_score,
                created_at: c.ranked.chunk.created_at,
                id: c.ranked.chunk.id.clone(),
            });
        }
        // Same ordering as the ranker: best first, drop from the tail
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut dropped_memories = std::collections::HashSet::new();
        let mut dropped_chunks = std::collections::HashSet::new();
        while used > limits.token_budget {
            let Some(entry) = entries.pop() else {
                break;
            };
            used -= entry.tokens;
            if entry.is_memory {
                dropped_memories.insert(entry.index);
            } else {
                dropped_chunks.insert(entry.index);
            }
            debug!("budget drop: {} ({} tokens)", entry.id, entry.tokens);
        }

        let mut index = 0;
        packed_memories.retain(|_| {
            let keep = !dropped_memories.contains(&index);
            index += 1;
            keep
        });
        index = 0;
        packed_chunks.retain(|_| {
            let keep = !dropped_chunks.contains(&index);
            index += 1;
            keep
        });
    }

    Ok(BudgetResult {
        state_json,
        state_tokens,
        state_truncated,
        included_memory_ids: packed_memories
            .iter()
            .map(|m| m.ranked.memory.id.clone())
            .collect(),
        included_chunk_ids: packed_chunks
            .iter()
            .map(|c| c.ranked.chunk.id.clone())
            .collect(),
        used_tokens: used,
        memories: packed_memories,
        chunks: packed_chunks,
    })
}

/// Normalize the state document and force it under `state_max`.
fn pack_state(
    limits: &PackLimits,
    tok: &DeferredTokenizer<'_>,
    raw_state: &str,
    stored_tokens: usize,
) -> Result<(String, usize, bool)> {
    let normalized = normalize_state_json(raw_state);

    // Cheap path: an empty object with no stored count costs 2
    let tokens = if stored_tokens > 0 {
        stored_tokens
    } else if normalized == "{}" {
        2
    } else {
        tok.count(&normalized)?
    };

    if tokens <= limits.state_max {
        return Ok((normalized, tokens, false));
    }

    // Truncate the raw text, wrap it, and recount; shrink the limit
    // until the wrapper itself fits
    let mut limit = limits.state_max;
    loop {
        let (truncated, _) = tok.truncate(raw_state.trim(), limit)?;
        let wrapped = serde_json::json!({ "raw": truncated, "truncated": true }).to_string();
        let wrapped_tokens = tok.count(&wrapped)?;
        if wrapped_tokens <= limits.state_max || limit <= 10 {
            return Ok((wrapped, wrapped_tokens, true));
        }
        limit = limit.saturating_sub(10);
    }
}
