//! Input normalization for rule matching.
//!
//! Attackers layer encodings (`%2527`, `&lt;`, mixed case) to slip past
//! literal signatures. Each rule names the transforms it wants; the engine
//! funnels the raw phase input through [`apply`] before matching. The decode
//! depth is bounded so a hostile input cannot force unbounded re-decoding.

mod path;

pub use path::normalize_path;

use percent_encoding::percent_decode_str;

/// Default number of percent-decoding passes.
pub const DEFAULT_DECODE_DEPTH: usize = 2;

/// Transform selection for one normalization run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// 0 selects [`DEFAULT_DECODE_DEPTH`].
    pub max_decode_depth: usize,
    pub lowercase: bool,
    pub html_entity: bool,
    pub normalize_path: bool,
}

/// Normalize `input` in a fixed order: iterated percent-decoding, then path
/// normalization, then HTML-entity decoding, then lowercasing. Decoding
/// failures keep the last good value instead of erroring.
pub fn apply(input: &str, opts: Options) -> String {
    let depth = if opts.max_decode_depth == 0 {
        DEFAULT_DECODE_DEPTH
    } else {
        opts.max_decode_depth
    };

    let mut value = input.to_string();
    for _ in 0..depth {
        match decode_once(&value) {
            Some(next) if next != value => value = next,
            _ => break,
        }
    }

    if opts.normalize_path {
        value = normalize_path(&value);
    }
    if opts.html_entity {
        value = html_escape::decode_html_entities(&value).into_owned();
    }
    if opts.lowercase {
        value = value.to_lowercase();
    }

    value
}

fn decode_once(input: &str) -> Option<String> {
    percent_decode_str(input)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// HTTP/1.1 canonical form of a header name: `x-test` becomes `X-Test`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_stops_at_depth() {
        let opts = Options {
            max_decode_depth: 2,
            ..Options::default()
        };
        assert_eq!(apply("%252e%252e%252f", opts), "%2e%2e/");

        let opts = Options {
            max_decode_depth: 3,
            ..Options::default()
        };
        assert_eq!(apply("%252e%252e%252f", opts), "../");
    }

    #[test]
    fn decode_stops_on_noop_pass() {
        let opts = Options {
            max_decode_depth: 5,
            ..Options::default()
        };
        assert_eq!(apply("plain", opts), "plain");
    }

    #[test]
    fn lowercase_after_decode() {
        let opts = Options {
            max_decode_depth: 1,
            lowercase: true,
            ..Options::default()
        };
        assert_eq!(apply("%3CScRipT%3E", opts), "<script>");
    }

    #[test]
    fn html_entities_decode() {
        let opts = Options {
            html_entity: true,
            ..Options::default()
        };
        assert_eq!(apply("&lt;div&gt;", opts), "<div>");
        assert_eq!(apply("&#x27;or&#39;", opts), "'or'");
    }

    #[test]
    fn invalid_utf8_keeps_last_good_value() {
        // %ff decodes to a lone invalid byte; the pass is dropped.
        assert_eq!(apply("a%ffb", Options::default()), "a%ffb");
    }

    #[test]
    fn canonical_header_names() {
        assert_eq!(canonical_header_name("x-test"), "X-Test");
        assert_eq!(canonical_header_name("CONTENT-type"), "Content-Type");
        assert_eq!(canonical_header_name("authorization"), "Authorization");
    }
}
