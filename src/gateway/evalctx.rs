//! Phase-input construction for the rules engine.
//!
//! Each phase is rendered to a plain string once per request. Sensitive
//! header values never enter the context, and JSON bodies are reduced to a
//! redacted `key=value` rendering of their top-level scalars so body rules
//! match on fields rather than raw framing.

use axum::http::{HeaderMap, Method};

use crate::normalize;
use crate::redact;
use crate::rules::EvalContext;

const MAX_JSON_FIELDS: usize = 50;

pub fn build(
    method: &Method,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    content_type: Option<&str>,
    body: &[u8],
) -> EvalContext {
    EvalContext {
        request_line: format!("{method} {path}"),
        headers: headers_for_eval(headers),
        query: query.to_string(),
        body: body_for_eval(content_type, body),
    }
}

/// Render headers as `Canonical-Name: value` lines. Sensitive headers get a
/// single `<redacted>` line regardless of how many values they carry.
pub fn headers_for_eval(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for name in headers.keys() {
        let canonical = normalize::canonical_header_name(name.as_str());
        if redact::is_sensitive_header(name.as_str()) {
            out.push_str(&canonical);
            out.push_str(": <redacted>\n");
            continue;
        }
        for value in headers.get_all(name) {
            out.push_str(&canonical);
            out.push_str(": ");
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
            out.push('\n');
        }
    }
    out
}

/// Body input for rule matching: shallow JSON rendering when the content type
/// says JSON and the body parses as a top-level object, raw text otherwise.
pub fn body_for_eval(content_type: Option<&str>, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    if let Some(content_type) = content_type {
        if content_type.to_lowercase().contains("application/json") {
            if let Some(rendered) = shallow_json(body) {
                if !rendered.is_empty() {
                    return rendered;
                }
            }
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

/// `key=value` pairs for the first [`MAX_JSON_FIELDS`] top-level scalar
/// fields, with secret redaction applied to the rendering.
fn shallow_json(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let mut out = String::new();
    for (key, raw) in object.iter().take(MAX_JSON_FIELDS) {
        let Some(text) = format_scalar(raw) else {
            continue;
        };
        out.push_str(key);
        out.push('=');
        out.push_str(&text);
        out.push(' ');
    }
    Some(redact::redact_secrets(out.trim_end()))
}

fn format_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
