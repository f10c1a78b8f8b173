//! Secret redaction.
//!
//! Applied to rule evidence and body renderings before they can reach the
//! decision log or a metric label. Sensitive headers are never rendered
//! verbatim anywhere.

use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_KV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|token|api[_-]?key|secret)\s*=\s*([^\s&]+)")
        .expect("secret k=v pattern compiles")
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+\-/]+=*").expect("bearer pattern compiles")
});

/// Replace credential-shaped substrings with `<redacted>` markers.
pub fn redact_secrets(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let redacted = SECRET_KV.replace_all(input, "$1=<redacted>");
    BEARER.replace_all(&redacted, "bearer <redacted>").into_owned()
}

/// Headers whose values must never appear in logs or evidence.
pub fn is_sensitive_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization")
        || name.eq_ignore_ascii_case("cookie")
        || name.eq_ignore_ascii_case("set-cookie")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_key_value_secrets() {
        assert_eq!(
            redact_secrets("user=alice password=hunter2 next=1"),
            "user=alice password=<redacted> next=1"
        );
        assert_eq!(redact_secrets("api_key=abc123&x=1"), "api_key=<redacted>&x=1");
        assert_eq!(redact_secrets("API-KEY = abc123"), "API-KEY=<redacted>");
        assert_eq!(redact_secrets("token=tok secret=sec"), "token=<redacted> secret=<redacted>");
    }

    #[test]
    fn redacts_bearer_tokens() {
        assert_eq!(
            redact_secrets("Authorization: Bearer abc.DEF-123=="),
            "Authorization: bearer <redacted>"
        );
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        assert_eq!(redact_secrets("q=1 or 1=1"), "q=1 or 1=1");
        assert_eq!(redact_secrets(""), "");
    }

    #[test]
    fn sensitive_headers_matched_case_insensitively() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("COOKIE"));
        assert!(is_sensitive_header("set-cookie"));
        assert!(!is_sensitive_header("X-Test"));
    }
}
