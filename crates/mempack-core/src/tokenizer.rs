//! Token counting and truncation
//!
//! The budget packer and pack assembler measure everything in tokens of a
//! named encoding. Both operations are pure and deterministic for a given
//! encoding; truncation returns a prefix of the input cut at a token
//! boundary.

use tiktoken_rs::CoreBPE;

use crate::error::CoreError;

/// Default encoding used when the caller does not name one.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Count and truncate strings by token units.
pub trait Tokenizer: Send + Sync {
    /// The encoding identifier this tokenizer was built for.
    fn encoding(&self) -> &str;

    /// Number of tokens in `text`. Empty text counts 0.
    fn count(&self, text: &str) -> usize;

    /// Truncate `text` to at most `max_tokens` tokens.
    ///
    /// Returns the (possibly shortened) text and its token count. The
    /// returned text is always a prefix of the input.
    fn truncate(&self, text: &str, max_tokens: usize) -> (String, usize);
}

/// BPE tokenizer backed by tiktoken encodings.
pub struct BpeTokenizer {
    bpe: CoreBPE,
    encoding: String,
}

impl std::fmt::Debug for BpeTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenizer").field("encoding", &self.encoding).finish()
    }
}

impl BpeTokenizer {
    /// Initialize the named encoding.
    ///
    /// Known encodings: `cl100k_base`, `o200k_base`, `p50k_base`,
    /// `r50k_base`. Anything else fails with
    /// [`CoreError::TokenizerUnavailable`].
    pub fn new(encoding: &str) -> Result<Self, CoreError> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => {
                return Err(CoreError::tokenizer_unavailable(
                    other,
                    "unknown encoding name",
                ))
            }
        }
        .map_err(|e| CoreError::tokenizer_unavailable(encoding, e.to_string()))?;

        Ok(Self {
            bpe,
            encoding: encoding.to_string(),
        })
    }

    /// Initialize the default encoding.
    pub fn default_encoding() -> Result<Self, CoreError> {
        Self::new(DEFAULT_ENCODING)
    }
}

impl Tokenizer for BpeTokenizer {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> (String, usize) {
        if max_tokens == 0 || text.is_empty() {
            return (String::new(), 0);
        }
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return (text.to_string(), tokens.len());
        }
        // A token prefix can end mid-codepoint; back off until it decodes.
        let mut keep = max_tokens;
        while keep > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..keep].to_vec()) {
                return (prefix, keep);
            }
            keep -= 1;
        }
        (String::new(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> BpeTokenizer {
        BpeTokenizer::default_encoding().unwrap()
    }

    #[test]
    fn test_unknown_encoding_fails() {
        let err = BpeTokenizer::new("not_an_encoding").unwrap_err();
        assert!(matches!(err, CoreError::TokenizerUnavailable { .. }));
    }

    #[test]
    fn test_count_empty_is_zero() {
        assert_eq!(tokenizer().count(""), 0);
    }

    #[test]
    fn test_count_is_deterministic() {
        let tok = tokenizer();
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(tok.count(text), tok.count(text));
        assert!(tok.count(text) > 0);
    }

    #[test]
    fn test_truncate_under_budget_is_identity() {
        let tok = tokenizer();
        let (text, count) = tok.truncate("hello world", 100);
        assert_eq!(text, "hello world");
        assert_eq!(count, tok.count("hello world"));
    }

    #[test]
    fn test_truncate_respects_budget_and_prefix() {
        let tok = tokenizer();
        let input = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let (text, count) = tok.truncate(input, 4);
        assert!(count <= 4);
        assert!(input.starts_with(&text));
        assert!(!text.is_empty());
    }

    #[test]
    fn test_truncate_to_zero() {
        let tok = tokenizer();
        let (text, count) = tok.truncate("anything", 0);
        assert_eq!(text, "");
        assert_eq!(count, 0);
    }
}
