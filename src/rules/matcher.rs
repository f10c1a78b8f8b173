//! Regex and multi-pattern matchers.
//!
//! Both variants answer the same question: does the normalized input match,
//! and if so, what short snippet proves it. No new matcher kind appears at
//! runtime, so a closed enum replaces trait objects.

use aho_corasick::AhoCorasick;
use regex::Regex;

use super::snippet;
use crate::error::{GatewayError, Result};

/// A compiled matcher owned by exactly one rule.
#[derive(Debug)]
pub enum Matcher {
    /// Single compiled regex; evidence is the first match.
    Regex(Regex),
    /// Aho–Corasick automaton over a signature list; evidence is the matched
    /// pattern.
    Aho {
        automaton: AhoCorasick,
        patterns: Vec<String>,
    },
}

impl Matcher {
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Matcher::Regex(Regex::new(pattern)?))
    }

    /// Build the automaton from non-empty patterns. A set that is empty, or
    /// contains only empty strings, is rejected.
    pub fn aho(patterns: Vec<String>) -> Result<Self> {
        let patterns: Vec<String> = patterns.into_iter().filter(|p| !p.is_empty()).collect();
        if patterns.is_empty() {
            return Err(GatewayError::PatternBuild(
                "at least one non-empty pattern is required".to_string(),
            ));
        }
        let automaton = AhoCorasick::new(&patterns)
            .map_err(|err| GatewayError::PatternBuild(err.to_string()))?;
        Ok(Matcher::Aho {
            automaton,
            patterns,
        })
    }

    /// Returns the evidence snippet on a match, `None` otherwise.
    pub fn find(&self, input: &str) -> Option<String> {
        match self {
            Matcher::Regex(re) => re.find(input).map(|m| snippet(m.as_str())),
            Matcher::Aho {
                automaton,
                patterns,
            } => automaton
                .find(input)
                .map(|m| snippet(&patterns[m.pattern().as_usize()])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_match_returns_matched_substring() {
        let matcher = Matcher::regex("(?i)<script>").unwrap();
        assert_eq!(matcher.find("a<script>b").as_deref(), Some("<script>"));
        assert_eq!(matcher.find("clean"), None);
    }

    #[test]
    fn regex_rejects_invalid_pattern() {
        assert!(Matcher::regex("(").is_err());
    }

    #[test]
    fn aho_reports_matched_pattern_as_evidence() {
        let matcher = Matcher::aho(vec!["or 1=1".into(), "union select".into()]).unwrap();
        assert_eq!(matcher.find("q=1 or 1=1").as_deref(), Some("or 1=1"));
        assert_eq!(matcher.find("q=hello"), None);
    }

    #[test]
    fn aho_rejects_empty_pattern_sets() {
        assert!(Matcher::aho(vec![]).is_err());
        assert!(Matcher::aho(vec![String::new(), String::new()]).is_err());
    }

    #[test]
    fn aho_skips_empty_patterns_but_keeps_rest() {
        let matcher = Matcher::aho(vec![String::new(), "drop table".into()]).unwrap();
        assert_eq!(
            matcher.find("; drop table users").as_deref(),
            Some("drop table")
        );
    }

    #[test]
    fn evidence_is_truncated() {
        let long = "a".repeat(100);
        let matcher = Matcher::aho(vec![long]).unwrap();
        let evidence = matcher.find(&"a".repeat(100)).unwrap();
        assert_eq!(evidence.len(), 64);
    }
}
