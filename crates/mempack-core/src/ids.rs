//! Identifier generation and content hashing
//!
//! Ids are opaque strings with a type prefix: memories `M-…`, chunks
//! `C-…`, artifacts `A-…`, state history `S-…`. Memories imported from a
//! share bundle get `MSH-<8hex(source_repo_id)>-<sanitized source id>` so
//! a second import of the same bundle maps onto the same local rows.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a memory id (`M-<uuid>`).
pub fn memory_id() -> String {
    format!("M-{}", Uuid::new_v4().simple())
}

/// Generate a chunk id (`C-<uuid>`).
pub fn chunk_id() -> String {
    format!("C-{}", Uuid::new_v4().simple())
}

/// Generate an artifact id (`A-<uuid>`).
pub fn artifact_id() -> String {
    format!("A-{}", Uuid::new_v4().simple())
}

/// Generate a state-history id (`S-<uuid>`).
pub fn state_id() -> String {
    format!("S-{}", Uuid::new_v4().simple())
}

/// SHA-256 hex digest of UTF-8 text. Stable across runs; used for
/// embedding freshness checks and artifact/chunk content hashes.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic local id for a memory imported from another repo's
/// share bundle.
pub fn shared_import_id(source_repo_id: &str, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_repo_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "MSH-{}-{}",
        &digest[..8],
        sanitize_id_component(source_id)
    )
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`. Id
/// components must stay shell- and filename-safe.
pub fn sanitize_id_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitize a tag: lowercase, runs of non-alphanumerics collapse to a
/// single `_`, leading/trailing `_` stripped.
pub fn sanitize_tag(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
