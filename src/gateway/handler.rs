//! The per-request pipeline.
//!
//! Route resolution, limit gates, optional body buffering, rate limiting,
//! rule evaluation, contract observe/evaluate, the action decision, upstream
//! dispatch and finally the decision record. Every failure on this path is
//! converted to an HTTP response locally; nothing propagates to the server
//! loop. Decision writes and metric updates are best-effort.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use url::form_urlencoded;

use crate::config::{Mode, Policy};
use crate::contract::{parse_media_type, violation, RequestShape};
use crate::gateway::router::Route;
use crate::gateway::{evalctx, Gateway};
use crate::logging::{Decision, MatchedRule};
use crate::normalize;
use crate::observability::{self, BlockReason};
use crate::policy::{self, Action};
use crate::proxy::{UpstreamBody, UpstreamError};
use crate::ratelimit;
use crate::redact;

impl Gateway {
    /// Evaluate and dispatch one request.
    pub async fn handle(&self, req: Request, client_addr: SocketAddr) -> Response {
        let start = Instant::now();

        let host = host_of(&req);
        let path = req.uri().path().to_string();
        let Some(route) = self.router.matches(&host, &path) else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };
        let route = route.clone();
        let Some(policy) = self.policies.get(&route.policy) else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };
        let Some(target) = self.upstreams.get(&route.upstream) else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };

        let query = req.uri().query().unwrap_or("").to_string();
        let method = req.method().clone();

        let mut pending = Pending {
            request_id: self.request_id(),
            client_ip: client_addr.ip().to_string(),
            host,
            method: method.to_string(),
            path: path.clone(),
            query: query.clone(),
            route: route.clone(),
            mode: policy.mode,
            threshold: policy.anomaly_threshold,
            score: 0,
            matched_rules: Vec::new(),
            contract_violations: Vec::new(),
            rate_limited: false,
            ratelimit_key_mode: policy.rate_limit.key,
        };

        if exceeds_header_limit(req.headers(), policy.limits.max_header_bytes) {
            let status = StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE;
            self.finish(&pending, Action::Block, status, start, 0, Some(BlockReason::Rule));
            return plain(status, "request headers too large");
        }

        let max_body = policy.limits.max_body_bytes;
        let content_length = content_length_of(req.headers());
        if max_body > 0 && content_length.is_some_and(|len| len > max_body) {
            let status = StatusCode::PAYLOAD_TOO_LARGE;
            self.finish(&pending, Action::Block, status, start, 0, Some(BlockReason::Rule));
            return plain(status, "request body too large");
        }

        let deadline = start + policy.limits.timeout;

        let (parts, body) = req.into_parts();

        // Buffer only when something downstream needs the bytes: a body rule,
        // or a contract that observes/checks the true size.
        let need_body = self.body_rules || matches!(policy.mode, Mode::Learn | Mode::Enforce);
        let mut buffered: Option<Bytes> = None;
        let mut stream_body: Option<Body> = None;
        let body_size: u64;

        if need_body && content_length != Some(0) {
            let cap = if max_body > 0 {
                usize::try_from(max_body).unwrap_or(usize::MAX)
            } else {
                usize::MAX
            };
            let read = tokio::time::timeout(remaining(deadline), axum::body::to_bytes(body, cap));
            match read.await {
                Err(_) => {
                    let status = StatusCode::GATEWAY_TIMEOUT;
                    self.finish(&pending, Action::Allow, status, start, 0, None);
                    return plain(status, "upstream timeout");
                }
                Ok(Err(_)) => {
                    let status = StatusCode::PAYLOAD_TOO_LARGE;
                    self.finish(&pending, Action::Block, status, start, 0, Some(BlockReason::Rule));
                    return plain(status, "request body too large");
                }
                Ok(Ok(bytes)) => {
                    body_size = bytes.len() as u64;
                    buffered = Some(bytes);
                }
            }
        } else {
            body_size = content_length.unwrap_or(0);
            stream_body = Some(body);
        }

        if policy.rate_limit.enabled {
            let key = ratelimit::bucket_key(policy.rate_limit.key, &pending.client_ip, &path);
            let allowed = self.limiter.allow(
                &key,
                policy.rate_limit.rps,
                policy.rate_limit.burst,
                Instant::now(),
            );
            if !allowed {
                pending.rate_limited = true;
                let status = rate_limit_status(policy);
                self.finish(&pending, Action::Block, status, start, 0, Some(BlockReason::Ratelimit));
                return plain(status, "rate limit exceeded");
            }
        }

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        let ctx = evalctx::build(
            &method,
            &path,
            &query,
            &parts.headers,
            content_type,
            buffered.as_deref().unwrap_or(&[]),
        );
        let result = self.engine.evaluate(&ctx);
        pending.score = result.score;
        pending.matched_rules = result
            .matches
            .into_iter()
            .map(|m| MatchedRule {
                id: m.rule_id,
                phase: m.phase.as_str().to_string(),
                score: m.score,
                tags: m.tags,
                evidence: redact::redact_secrets(&m.evidence),
            })
            .collect();

        let shape = request_shape(&method, &parts.headers, &query, body_size);
        let violations = self.check_contract(&route, policy, &shape);
        if !violations.is_empty() {
            pending.contract_violations = violations;
            if policy.mode == Mode::Enforce {
                let status = block_status(policy);
                self.finish(&pending, Action::Block, status, start, 0, Some(BlockReason::Contract));
                return plain(status, &policy.actions.block_body);
            }
        }

        let (action, should_block) = policy::decide(policy.mode, pending.score, pending.threshold);
        if should_block {
            let status = block_status(policy);
            self.finish(&pending, action, status, start, 0, Some(BlockReason::Rule));
            return plain(status, &policy.actions.block_body);
        }

        // Requests that declare no body (and are not chunked) forward as
        // empty rather than as an unbounded stream.
        let has_body = content_length.map_or_else(
            || parts.headers.contains_key(header::TRANSFER_ENCODING),
            |len| len > 0,
        );
        let upstream_body = match buffered {
            Some(bytes) => UpstreamBody::Buffered(bytes),
            None if has_body => UpstreamBody::Streaming {
                body: stream_body.unwrap_or_else(Body::empty),
                limit: max_body,
            },
            None => UpstreamBody::Buffered(Bytes::new()),
        };

        let upstream_start = Instant::now();
        let outcome = self
            .proxy
            .dispatch(
                target,
                method,
                &parts.headers,
                &path,
                &query,
                &pending.client_ip,
                upstream_body,
                remaining(deadline),
            )
            .await;
        let upstream_ms = upstream_start.elapsed().as_millis() as i64;

        match outcome {
            Ok(response) => {
                self.finish(&pending, action, response.status(), start, upstream_ms, None);
                response
            }
            Err(UpstreamError::Timeout) => {
                let status = StatusCode::GATEWAY_TIMEOUT;
                self.finish(&pending, action, status, start, upstream_ms, None);
                plain(status, "upstream timeout")
            }
            Err(UpstreamError::BodyTooLarge) => {
                let status = StatusCode::PAYLOAD_TOO_LARGE;
                self.finish(&pending, action, status, start, upstream_ms, None);
                plain(status, "request body too large")
            }
            Err(UpstreamError::Upstream(err)) => {
                tracing::warn!(upstream = %route.upstream, error = %err, "upstream request failed");
                let status = StatusCode::BAD_GATEWAY;
                self.finish(&pending, action, status, start, upstream_ms, None);
                plain(status, "upstream error")
            }
        }
    }

    fn check_contract(
        &self,
        route: &Route,
        policy: &Policy,
        shape: &RequestShape,
    ) -> Vec<violation::Violation> {
        let key = format!("{}|{}", route.id, route.policy);
        match (policy.mode, self.contracts.get(&key)) {
            (Mode::Learn, Some(super::ContractSlot::Learn(slot))) => {
                if let Ok(mut contract) = slot.lock() {
                    contract.observe(shape);
                }
                Vec::new()
            }
            (Mode::Enforce, Some(super::ContractSlot::Enforce(contract))) => {
                violation::evaluate(contract, shape, policy.contract.enforcement)
            }
            _ => Vec::new(),
        }
    }

    /// Write the decision record and update metrics. Never fails the request.
    fn finish(
        &self,
        pending: &Pending,
        action: Action,
        status: StatusCode,
        start: Instant,
        upstream_ms: i64,
        reason: Option<BlockReason>,
    ) {
        let decision = Decision {
            timestamp: Utc::now(),
            request_id: pending.request_id.clone(),
            client_ip: pending.client_ip.clone(),
            host: pending.host.clone(),
            method: pending.method.clone(),
            path: pending.path.clone(),
            query: pending.query.clone(),
            route_id: pending.route.id.clone(),
            policy: pending.route.policy.clone(),
            mode: pending.mode,
            score: pending.score,
            threshold: pending.threshold,
            action,
            status_code: status.as_u16(),
            matched_rules: pending.matched_rules.clone(),
            contract_violations: pending.contract_violations.clone(),
            rate_limited: pending.rate_limited,
            duration_ms: start.elapsed().as_millis() as i64,
            upstream_ms,
        };

        if let Some(logger) = &self.decision_log {
            if let Err(err) = logger.write(decision.clone()) {
                tracing::warn!(error = %err, "failed to write decision record");
            }
        }
        if self.metrics_enabled {
            observability::record_decision(&decision, reason, pending.ratelimit_key_mode.as_str());
        }
    }
}

/// Decision fields accumulated while the pipeline runs.
struct Pending {
    request_id: String,
    client_ip: String,
    host: String,
    method: String,
    path: String,
    query: String,
    route: Route,
    mode: Mode,
    threshold: i64,
    score: i64,
    matched_rules: Vec<MatchedRule>,
    contract_violations: Vec<violation::Violation>,
    rate_limited: bool,
    ratelimit_key_mode: ratelimit::KeyMode,
}

fn plain(status: StatusCode, body: &str) -> Response {
    (status, body.to_string()).into_response()
}

fn host_of(req: &Request) -> String {
    if let Some(host) = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        return host.to_string();
    }
    req.uri()
        .authority()
        .map(|authority| authority.to_string())
        .unwrap_or_default()
}

fn content_length_of(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Sum of `len(name) + len(value) + 2` over all header values.
fn exceeds_header_limit(headers: &HeaderMap, max_bytes: u64) -> bool {
    if max_bytes == 0 {
        return false;
    }
    let mut total: u64 = 0;
    for (name, value) in headers {
        total += (name.as_str().len() + value.len() + 2) as u64;
        if total > max_bytes {
            return true;
        }
    }
    false
}

fn request_shape(method: &Method, headers: &HeaderMap, query: &str, body_size: u64) -> RequestShape {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_media_type);

    let query_params: BTreeSet<String> = form_urlencoded::parse(query.as_bytes())
        .map(|(name, _)| name.into_owned())
        .collect();

    let header_names: BTreeSet<String> = headers
        .keys()
        .map(|name| normalize::canonical_header_name(name.as_str()))
        .collect();

    RequestShape {
        method: method.to_string(),
        content_type,
        query_params: query_params.into_iter().collect(),
        header_names: header_names.into_iter().collect(),
        body_size,
    }
}

fn block_status(policy: &Policy) -> StatusCode {
    if policy.actions.block_status_code > 0 {
        if let Ok(status) = StatusCode::from_u16(policy.actions.block_status_code) {
            return status;
        }
    }
    StatusCode::FORBIDDEN
}

fn rate_limit_status(policy: &Policy) -> StatusCode {
    if policy.rate_limit.status_code > 0 {
        if let Ok(status) = StatusCode::from_u16(policy.rate_limit.status_code) {
            return status;
        }
    }
    StatusCode::TOO_MANY_REQUESTS
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_limit_counts_name_value_and_separator() {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", HeaderValue::from_static("0123456789"));
        // "x-test" (6) + value (10) + 2 = 18
        assert!(exceeds_header_limit(&headers, 8));
        assert!(!exceeds_header_limit(&headers, 18));
        assert!(!exceeds_header_limit(&headers, 0));
    }

    #[test]
    fn request_shape_collects_distinct_names() {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", HeaderValue::from_static("1"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );

        let shape = request_shape(&Method::POST, &headers, "q=1&q=2&debug=x", 7);
        assert_eq!(shape.method, "POST");
        assert_eq!(shape.content_type.as_deref(), Some("application/json"));
        assert_eq!(shape.query_params, vec!["debug".to_string(), "q".to_string()]);
        assert!(shape.header_names.contains(&"X-Test".to_string()));
        assert!(shape.header_names.contains(&"Content-Type".to_string()));
        assert_eq!(shape.body_size, 7);
    }

    #[test]
    fn status_fallbacks() {
        let policy: Policy = serde_yaml::from_str("mode: enforce").unwrap();
        assert_eq!(block_status(&policy), StatusCode::FORBIDDEN);
        assert_eq!(rate_limit_status(&policy), StatusCode::TOO_MANY_REQUESTS);

        let policy: Policy = serde_yaml::from_str(
            "mode: enforce\nactions:\n  blockStatusCode: 451\nrateLimit:\n  statusCode: 503\n",
        )
        .unwrap();
        assert_eq!(block_status(&policy), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);
        assert_eq!(rate_limit_status(&policy), StatusCode::SERVICE_UNAVAILABLE);
    }
}
