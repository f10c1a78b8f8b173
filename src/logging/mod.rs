//! Decision records and the append-only JSONL sink.
//!
//! Every evaluated request produces exactly one [`Decision`], written as a
//! single JSON line. A write is one `write_all` of the serialized bytes plus
//! newline under the file mutex, so concurrent requests may interleave lines
//! but never bytes. Sink failures are reported to the caller, which logs and
//! swallows them; a broken log must never fail traffic.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::contract::violation::Violation;
use crate::error::Result;
use crate::policy::Action;
use crate::rules::snippet;

/// A rule hit as it appears in the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub id: String,
    pub phase: String,
    pub score: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub evidence: String,
}

/// One structured log entry per evaluated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub client_ip: String,
    pub host: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub route_id: String,
    pub policy: String,
    pub mode: Mode,
    pub score: i64,
    pub threshold: i64,
    pub action: Action,
    pub status_code: u16,
    #[serde(default)]
    pub matched_rules: Vec<MatchedRule>,
    #[serde(default)]
    pub contract_violations: Vec<Violation>,
    pub rate_limited: bool,
    pub duration_ms: i64,
    pub upstream_ms: i64,
}

/// Append-only JSONL writer.
#[derive(Debug)]
pub struct DecisionLogger {
    file: Mutex<File>,
}

impl DecisionLogger {
    /// Open (or create, mode 0600) the log file for appending, creating the
    /// parent directory as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            DirBuilder::new().recursive(true).mode(0o755).create(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Serialize and append one decision. Evidence is capped at the sink
    /// regardless of what the capture side did.
    pub fn write(&self, mut decision: Decision) -> Result<()> {
        for rule in &mut decision.matched_rules {
            if rule.evidence.len() > crate::rules::MAX_EVIDENCE_BYTES {
                rule.evidence = snippet(&rule.evidence);
            }
        }

        let mut line = serde_json::to_vec(&decision)?;
        line.push(b'\n');

        if let Ok(mut file) = self.file.lock() {
            file.write_all(&line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision() -> Decision {
        Decision {
            timestamp: Utc::now(),
            request_id: "abc123".to_string(),
            client_ip: "203.0.113.1".to_string(),
            host: "example.com".to_string(),
            method: "GET".to_string(),
            path: "/api".to_string(),
            query: "q=1".to_string(),
            route_id: "route-0".to_string(),
            policy: "default".to_string(),
            mode: Mode::Shadow,
            score: 5,
            threshold: 5,
            action: Action::Shadow,
            status_code: 200,
            matched_rules: vec![],
            contract_violations: vec![],
            rate_limited: false,
            duration_ms: 12,
            upstream_ms: 8,
        }
    }

    #[test]
    fn writes_one_json_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let logger = DecisionLogger::open(&path).unwrap();

        logger.write(sample_decision()).unwrap();
        logger.write(sample_decision()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: Decision = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.route_id, "route-0");
            assert_eq!(parsed.action, Action::Shadow);
        }
    }

    #[test]
    fn evidence_is_capped_at_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let logger = DecisionLogger::open(&path).unwrap();

        let mut decision = sample_decision();
        decision.matched_rules.push(MatchedRule {
            id: "r1".to_string(),
            phase: "query".to_string(),
            score: 5,
            tags: vec![],
            evidence: "x".repeat(500),
        });
        logger.write(decision).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Decision = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.matched_rules[0].evidence.len(), 64);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        DecisionLogger::open(&path).unwrap().write(sample_decision()).unwrap();
        DecisionLogger::open(&path).unwrap().write(sample_decision()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn uses_wire_field_names() {
        let json = serde_json::to_string(&sample_decision()).unwrap();
        assert!(json.contains("\"ts\":"));
        assert!(json.contains("\"mode\":\"shadow\""));
        assert!(json.contains("\"action\":\"shadow\""));
        assert!(json.contains("\"rate_limited\":false"));
    }
}
