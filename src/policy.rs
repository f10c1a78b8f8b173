//! Action decision.
//!
//! Maps the rule score against the policy's anomaly threshold, filtered
//! through the operating mode. Scores below the threshold always allow;
//! at or above it, only enforce mode actually blocks.

use serde::{Deserialize, Serialize};

use crate::config::Mode;

/// The decision recorded for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
    Shadow,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Block => "block",
            Action::Shadow => "shadow",
        }
    }
}

/// Returns the action plus whether the request must actually be blocked.
pub fn decide(mode: Mode, score: i64, threshold: i64) -> (Action, bool) {
    if score < threshold {
        return (Action::Allow, false);
    }

    match mode {
        Mode::Enforce => (Action::Block, true),
        Mode::Shadow => (Action::Shadow, false),
        Mode::Learn => (Action::Allow, false),
    }
}
