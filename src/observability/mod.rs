//! Prometheus metrics over gateway decisions.
//!
//! Uses the `metrics` facade with the Prometheus exporter's own HTTP
//! listener. When the exporter is not installed (metrics disabled), the
//! macros are no-ops, so recording is unconditional and can never fail a
//! request.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use crate::error::{GatewayError, Result};
use crate::logging::Decision;
use crate::policy::Action;

/// Default Prometheus histogram buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Why a request was blocked, as exported in `blocks_total{reason}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Rule,
    Contract,
    Ratelimit,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Rule => "rule",
            BlockReason::Contract => "contract",
            BlockReason::Ratelimit => "ratelimit",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|err| GatewayError::Metrics(err.to_string()))?
        .install()
        .map_err(|err| GatewayError::Metrics(err.to_string()))?;

    tracing::info!(address = %addr, "metrics listener started");
    Ok(())
}

/// Record one decision: request counter and duration always, block /
/// rule-match / contract-violation / rate-limit counters as applicable.
pub fn record_decision(decision: &Decision, reason: Option<BlockReason>, ratelimit_key: &str) {
    let route = decision.route_id.clone();
    let policy = decision.policy.clone();

    counter!(
        "requests_total",
        "route" => route.clone(),
        "policy" => policy.clone(),
        "action" => decision.action.as_str(),
        "code" => decision.status_code.to_string()
    )
    .increment(1);

    histogram!(
        "request_duration_seconds",
        "route" => route.clone(),
        "policy" => policy.clone()
    )
    .record(decision.duration_ms as f64 / 1000.0);

    if decision.action == Action::Block || reason.is_some() {
        let reason = reason.map(|r| r.as_str()).unwrap_or("rule");
        counter!(
            "blocks_total",
            "route" => route.clone(),
            "policy" => policy.clone(),
            "reason" => reason
        )
        .increment(1);
    }

    for matched in &decision.matched_rules {
        let tag = matched
            .tags
            .first()
            .cloned()
            .unwrap_or_else(|| "none".to_string());
        counter!(
            "rule_matches_total",
            "rule_id" => matched.id.clone(),
            "tag" => tag,
            "phase" => matched.phase.clone()
        )
        .increment(1);
    }

    for violation in &decision.contract_violations {
        counter!(
            "contract_violations_total",
            "route" => route.clone(),
            "policy" => policy.clone(),
            "type" => violation.kind.as_str()
        )
        .increment(1);
    }

    if decision.rate_limited {
        counter!(
            "ratelimit_hits_total",
            "route" => route,
            "policy" => policy,
            "key" => ratelimit_key.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use chrono::Utc;

    fn decision(action: Action, rate_limited: bool) -> Decision {
        Decision {
            timestamp: Utc::now(),
            request_id: "id".to_string(),
            client_ip: "127.0.0.1".to_string(),
            host: "example.com".to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            query: String::new(),
            route_id: "route-0".to_string(),
            policy: "default".to_string(),
            mode: Mode::Enforce,
            score: 0,
            threshold: 5,
            action,
            status_code: 200,
            matched_rules: vec![],
            contract_violations: vec![],
            rate_limited,
            duration_ms: 3,
            upstream_ms: 1,
        }
    }

    // With no recorder installed the macros are no-ops; recording must not
    // panic in any shape.
    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_decision(&decision(Action::Allow, false), None, "ip");
        record_decision(&decision(Action::Block, true), Some(BlockReason::Ratelimit), "ip_path");
    }

    #[test]
    fn block_reasons_name_their_label() {
        assert_eq!(BlockReason::Rule.as_str(), "rule");
        assert_eq!(BlockReason::Contract.as_str(), "contract");
        assert_eq!(BlockReason::Ratelimit.as_str(), "ratelimit");
    }
}
