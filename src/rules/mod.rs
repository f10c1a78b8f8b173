//! Pattern-based detection rules.
//!
//! A rule targets one request phase, runs its input through a transform chain
//! and hands the normalized text to its matcher. Matches carry a short
//! evidence snippet that is redacted and capped before it can reach a log.

pub mod compile;
pub mod engine;
pub mod matcher;

pub use engine::Engine;
pub use matcher::Matcher;

use serde::{Deserialize, Serialize};

/// Upper bound on evidence snippets, in bytes.
pub const MAX_EVIDENCE_BYTES: usize = 64;

/// The request phase a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    RequestLine,
    Headers,
    Query,
    Body,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RequestLine => "request_line",
            Phase::Headers => "headers",
            Phase::Query => "query",
            Phase::Body => "body",
        }
    }
}

/// Normalization step applied before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Lowercase,
    HtmlEntity,
    NormalizePath,
}

/// Matcher implementation selector in the config schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Regex,
    Aho,
}

/// A compiled detection rule.
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub phase: Phase,
    pub score: i64,
    pub tags: Vec<String>,
    pub transforms: Vec<Transform>,
    pub matcher: Matcher,
}

/// One rule hit with its evidence snippet.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule_id: String,
    pub phase: Phase,
    pub score: i64,
    pub tags: Vec<String>,
    pub evidence: String,
}

/// Outcome of one engine evaluation: additive score plus ordered matches.
#[derive(Debug, Default)]
pub struct EvalResult {
    pub score: i64,
    pub matches: Vec<RuleMatch>,
}

/// Raw inputs for one request, one string per phase. Transforms are applied
/// per rule by the engine, never here.
#[derive(Debug, Default)]
pub struct EvalContext {
    pub request_line: String,
    pub headers: String,
    pub query: String,
    pub body: String,
}

/// Truncate evidence to [`MAX_EVIDENCE_BYTES`], respecting UTF-8 boundaries.
pub fn snippet(value: &str) -> String {
    if value.len() <= MAX_EVIDENCE_BYTES {
        return value.to_string();
    }
    let mut end = MAX_EVIDENCE_BYTES;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_caps_at_64_bytes() {
        let long = "x".repeat(200);
        assert_eq!(snippet(&long).len(), 64);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn snippet_respects_utf8_boundaries() {
        // 2-byte chars; byte 64 falls mid-character.
        let value = "é".repeat(40);
        let out = snippet(&value);
        assert!(out.len() <= 64);
        assert!(out.is_char_boundary(out.len()));
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::RequestLine).unwrap(),
            "\"request_line\""
        );
        assert_eq!(Phase::RequestLine.as_str(), "request_line");
    }
}
