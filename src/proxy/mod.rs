//! Upstream dispatch.
//!
//! A single shared `reqwest::Client` carries every proxied request. The
//! connect timeout is derived from the longest policy timeout at startup, so
//! no transport-level cap can undercut a policy's own limit; each request
//! additionally carries its remaining per-request deadline as total timeout.
//!
//! Bodies that were buffered for inspection are replayed as bytes. Bodies
//! that were not needed stream straight through, wrapped in a length-limited
//! body so the policy's byte cap still holds mid-stream.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use futures_util::TryStreamExt;
use http_body_util::{BodyStream, Limited};
use url::Url;

use crate::error::Result;

/// Request body handed to the dispatcher.
pub enum UpstreamBody {
    /// Inspected and buffered; replayed with its original length.
    Buffered(Bytes),
    /// Streamed through untouched, capped at `limit` bytes (0 = no cap).
    Streaming { body: Body, limit: u64 },
}

/// Why an upstream round-trip failed, pre-sorted into the status buckets the
/// handler responds with.
#[derive(Debug)]
pub enum UpstreamError {
    /// Deadline expired or the call was canceled (504).
    Timeout,
    /// The streamed request body overran the byte cap (413).
    BodyTooLarge,
    /// Anything else: connect refused, protocol error, DNS (502).
    Upstream(reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
}

impl ProxyClient {
    /// Build the shared transport. `max_timeout` is the maximum policy
    /// timeout across the whole config.
    pub fn new(max_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(max_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .build()?;
        Ok(Self { client })
    }

    /// Forward one request to `target`, returning the upstream response as an
    /// axum response with its body streaming through.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &self,
        target: &Url,
        method: Method,
        headers: &HeaderMap,
        path: &str,
        query: &str,
        client_ip: &str,
        body: UpstreamBody,
        timeout: Duration,
    ) -> std::result::Result<Response, UpstreamError> {
        let url = upstream_url(target, path, query);
        let forwarded = forward_headers(headers, client_ip);

        let request_body = match body {
            UpstreamBody::Buffered(bytes) => reqwest::Body::from(bytes),
            UpstreamBody::Streaming { body, limit } => {
                let cap = if limit == 0 {
                    usize::MAX
                } else {
                    usize::try_from(limit).unwrap_or(usize::MAX)
                };
                let limited = Limited::new(body, cap);
                let stream = BodyStream::new(limited)
                    .try_filter_map(|frame| std::future::ready(Ok(frame.into_data().ok())));
                reqwest::Body::wrap_stream(stream)
            }
        };

        let upstream = self
            .client
            .request(method, url)
            .headers(forwarded)
            .body(request_body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = upstream.status();
        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if !is_hop_header(name.as_str()) {
                response_headers.append(name.clone(), value.clone());
            }
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        return UpstreamError::Timeout;
    }
    if chain_contains::<http_body_util::LengthLimitError>(&err) {
        return UpstreamError::BodyTooLarge;
    }
    UpstreamError::Upstream(err)
}

fn chain_contains<T: std::error::Error + 'static>(err: &dyn std::error::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<T>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Join the upstream base path with the request path and query.
fn upstream_url(target: &Url, path: &str, query: &str) -> Url {
    let mut url = target.clone();
    let base = target.path().trim_end_matches('/');
    if base.is_empty() {
        url.set_path(path);
    } else {
        url.set_path(&format!("{base}{path}"));
    }
    url.set_query(if query.is_empty() { None } else { Some(query) });
    url
}

const HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Copy end-to-end headers and extend the `X-Forwarded-For` chain. Host and
/// Content-Length are re-derived from the outgoing request.
fn forward_headers(src: &HeaderMap, client_ip: &str) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in src {
        if is_hop_header(name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    let forwarded_for = match src
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        out.insert(HeaderName::from_static("x-forwarded-for"), value);
    }

    out
}
