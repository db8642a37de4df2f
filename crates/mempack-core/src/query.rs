//! Query validation, rewriting and classification
//!
//! The retrieval path runs every raw query through three deterministic
//! stages: `validate` (reject junk), `rewrite` (sanitize and record the
//! transformations applied), `parse` (intent, entities, time hints,
//! recency boost). All string work is pure; only time-hint resolution
//! consults the injected [`Clock`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::CoreError;

/// Hard cap on raw query length.
pub const MAX_QUERY_CHARS: usize = 2000;

const DAY_SECONDS: i64 = 86_400;

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Code entity lookup (camelCase, snake_case, PascalCase)
    Identifier,
    /// Natural language question
    Question,
    /// General natural language query
    Natural,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Identifier => "identifier",
            QueryIntent::Question => "question",
            QueryIntent::Natural => "natural",
        }
    }
}

/// Result of the full validate → rewrite → parse pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedQuery {
    pub raw: String,
    pub sanitized: String,
    pub intent: QueryIntent,
    pub entities: Vec<String>,
    /// Epoch-seconds lower bound extracted from phrases like
    /// "yesterday" or "since 2026-01-15". Items created before it are
    /// penalized at ranking time.
    pub time_hint: Option<i64>,
    /// Multiplicative factor on recency bonuses (>= 0, default 1).
    pub boost_recency: f64,
    /// Applied rewrites as `"<before> -> <after>"` pairs.
    pub rewrites: Vec<String>,
}

static SPLIT_ALPHA_DIGIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{2,})([0-9]+)$").unwrap());
static SPLIT_DIGIT_ALPHA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)([A-Za-z]{2,})$").unwrap());
static IDENTIFIER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap());
static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][A-Z]").unwrap());
static SINCE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"since\s+(\d{4}-\d{2}-\d{2})").unwrap());

/// Stateless query pre-processor.
pub struct QueryProcessor;

impl QueryProcessor {
    /// Reject empty, oversize, or control-character-laden input.
    pub fn validate(raw: &str) -> Result<(), CoreError> {
        if raw.trim().is_empty() {
            return Err(CoreError::invalid_input("query is empty"));
        }
        if raw.chars().count() > MAX_QUERY_CHARS {
            return Err(CoreError::invalid_input(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }
        if raw
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return Err(CoreError::invalid_input(
                "query contains control characters",
            ));
        }
        Ok(())
    }

    /// Sanitize the query and record each transformation applied.
    ///
    /// Whitespace runs collapse to single spaces (not recorded); tokens
    /// with a glued letter/digit boundary are split and recorded, e.g.
    /// `delta99 -> delta 99`.
    pub fn rewrite(raw: &str) -> (String, Vec<String>) {
        let mut rewrites = Vec::new();
        let mut out_tokens = Vec::new();

        for token in raw.split_whitespace() {
            if let Some(caps) = SPLIT_ALPHA_DIGIT.captures(token) {
                let split = format!("{} {}", &caps[1], &caps[2]);
                rewrites.push(format!("{token} -> {split}"));
                out_tokens.push(split);
            } else if let Some(caps) = SPLIT_DIGIT_ALPHA.captures(token) {
                let split = format!("{} {}", &caps[1], &caps[2]);
                rewrites.push(format!("{token} -> {split}"));
                out_tokens.push(split);
            } else {
                out_tokens.push(token.to_string());
            }
        }

        (out_tokens.join(" "), rewrites)
    }

    /// Classify query intent.
    pub fn classify(query: &str) -> QueryIntent {
        let stripped = query.trim();

        let question_starters = [
            "how", "what", "why", "where", "when", "which", "who", "is", "are", "can", "does",
            "do",
        ];
        let first_word = stripped
            .to_lowercase()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        if stripped.ends_with('?') || question_starters.contains(&first_word.as_str()) {
            return QueryIntent::Question;
        }

        // Single-token queries that look like code entities
        if !stripped.contains(' ') && IDENTIFIER_TOKEN.is_match(stripped) {
            let has_underscore = stripped.contains('_');
            let has_dash = stripped.contains('-');
            let has_camel = CAMEL_BOUNDARY.is_match(stripped);
            let starts_upper = stripped
                .chars()
                .next()
                .map(|c| c.is_uppercase())
                .unwrap_or(false);
            if has_underscore || has_dash || has_camel || starts_upper {
                return QueryIntent::Identifier;
            }
        }

        QueryIntent::Natural
    }

    /// Extract identifier-like tokens, deduplicated in order.
    pub fn extract_entities(query: &str) -> Vec<String> {
        let mut entities = Vec::new();
        for token in query.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
            if token.len() < 2 {
                continue;
            }
            let looks_like_code = token.contains('_')
                || token.contains("::")
                || CAMEL_BOUNDARY.is_match(token)
                || (token.contains('.')
                    && token.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')));
            if looks_like_code && !entities.iter().any(|e| e == token) {
                entities.push(token.to_string());
            }
        }
        entities
    }

    /// Resolve a time hint from deterministic phrases, if any.
    pub fn time_hint(query: &str, clock: &dyn Clock) -> Option<i64> {
        let lower = query.to_lowercase();
        let now = clock.now();

        if let Some(caps) = SINCE_DATE.captures(&lower) {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                let midnight = date.and_hms_opt(0, 0, 0)?;
                return Some(midnight.and_utc().timestamp());
            }
        }
        if lower.contains("yesterday") {
            return Some(now - 2 * DAY_SECONDS);
        }
        if lower.contains("today") {
            return Some(now - DAY_SECONDS);
        }
        if lower.contains("last week") || lower.contains("past week") {
            return Some(now - 7 * DAY_SECONDS);
        }
        if lower.contains("last month") || lower.contains("past month") {
            return Some(now - 30 * DAY_SECONDS);
        }
        None
    }

    /// Recency boost factor derived from the query wording.
    pub fn recency_boost(query: &str) -> f64 {
        let lower = query.to_lowercase();
        if lower.contains("recent") || lower.contains("latest") || lower.contains("newest") {
            2.0
        } else {
            1.0
        }
    }

    /// Run the full pipeline: validate, rewrite, classify, extract.
    pub fn process(raw: &str, clock: &dyn Clock) -> Result<ProcessedQuery, CoreError> {
        Self::validate(raw)?;
        let (sanitized, rewrites) = Self::rewrite(raw);
        Ok(ProcessedQuery {
            raw: raw.to_string(),
            intent: Self::classify(&sanitized),
            entities: Self::extract_entities(&sanitized),
            time_hint: Self::time_hint(&sanitized, clock),
            boost_recency: Self::recency_boost(&sanitized),
            sanitized,
            rewrites,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn test_validate_rejects_empty() {
        assert!(QueryProcessor::validate("").is_err());
        assert!(QueryProcessor::validate("   \n ").is_err());
    }

    #[test]
    fn test_validate_rejects_oversize() {
        let big = "x".repeat(MAX_QUERY_CHARS + 1);
        assert!(QueryProcessor::validate(&big).is_err());
    }

    #[test]
    fn test_validate_rejects_control_chars() {
        assert!(QueryProcessor::validate("hello\u{0007}world").is_err());
        // Ordinary whitespace controls are fine
        assert!(QueryProcessor::validate("hello\tworld\n").is_ok());
    }

    #[test]
    fn test_rewrite_splits_glued_digits() {
        let (sanitized, rewrites) = QueryProcessor::rewrite("find delta99 rollout");
        assert_eq!(sanitized, "find delta 99 rollout");
        assert_eq!(rewrites, vec!["delta99 -> delta 99".to_string()]);
    }

    #[test]
    fn test_rewrite_splits_digit_prefix() {
        let (sanitized, rewrites) = QueryProcessor::rewrite("99delta");
        assert_eq!(sanitized, "99 delta");
        assert_eq!(rewrites, vec!["99delta -> 99 delta".to_string()]);
    }

    #[test]
    fn test_rewrite_collapses_whitespace_silently() {
        let (sanitized, rewrites) = QueryProcessor::rewrite("  a \t b\n c ");
        assert_eq!(sanitized, "a b c");
        assert!(rewrites.is_empty());
    }

    #[test]
    fn test_classify_question() {
        assert_eq!(
            QueryProcessor::classify("how does the packer work?"),
            QueryIntent::Question
        );
        assert_eq!(
            QueryProcessor::classify("is this superseded"),
            QueryIntent::Question
        );
    }

    #[test]
    fn test_classify_identifier() {
        assert_eq!(
            QueryProcessor::classify("snake_case_name"),
            QueryIntent::Identifier
        );
        assert_eq!(
            QueryProcessor::classify("BudgetPacker"),
            QueryIntent::Identifier
        );
        assert_eq!(
            QueryProcessor::classify("camelCase"),
            QueryIntent::Identifier
        );
    }

    #[test]
    fn test_classify_natural() {
        assert_eq!(
            QueryProcessor::classify("token budget drop order"),
            QueryIntent::Natural
        );
    }

    #[test]
    fn test_extract_entities() {
        let entities =
            QueryProcessor::extract_entities("where does serde_json handle BudgetPacker config.rs");
        assert_eq!(entities, vec!["serde_json", "BudgetPacker", "config.rs"]);
    }

    #[test]
    fn test_time_hint_phrases() {
        let clock = FixedClock::new(100 * DAY_SECONDS);
        assert_eq!(
            QueryProcessor::time_hint("changes from yesterday", &clock),
            Some(98 * DAY_SECONDS)
        );
        assert_eq!(
            QueryProcessor::time_hint("notes from last week", &clock),
            Some(93 * DAY_SECONDS)
        );
        assert_eq!(QueryProcessor::time_hint("plain query", &clock), None);
    }

    #[test]
    fn test_time_hint_since_date() {
        let clock = FixedClock::new(0);
        let hint = QueryProcessor::time_hint("decisions since 2026-01-15", &clock).unwrap();
        // 2026-01-15T00:00:00Z
        assert_eq!(hint, 1_768_435_200);
    }

    #[test]
    fn test_recency_boost() {
        assert_eq!(QueryProcessor::recency_boost("latest decision"), 2.0);
        assert_eq!(QueryProcessor::recency_boost("any decision"), 1.0);
    }

    #[test]
    fn test_process_pipeline() {
        let clock = FixedClock::new(1_000_000);
        let q = QueryProcessor::process("recent delta99 changes", &clock).unwrap();
        assert_eq!(q.sanitized, "recent delta 99 changes");
        assert_eq!(q.rewrites, vec!["delta99 -> delta 99".to_string()]);
        assert_eq!(q.boost_recency, 2.0);
        assert_eq!(q.intent, QueryIntent::Natural);
    }
}
