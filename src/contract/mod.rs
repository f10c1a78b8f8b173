//! Learned request contracts.
//!
//! A contract captures the observed shape of one route under one policy:
//! methods, media types, query parameter names, header names and the largest
//! body seen. Learn mode grows the sets monotonically; enforce mode loads a
//! finalized artifact and flags anything outside it.

pub mod storage;
pub mod violation;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How strictly a contract is applied in enforce mode.
///
/// Levels are ordered: each adds checks on top of the previous one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Methods, content types and body size.
    #[default]
    Lenient,
    /// Lenient plus unexpected query parameters.
    Moderate,
    /// Moderate plus unexpected headers.
    Strict,
}

/// The request features a contract observes or checks. Header names are
/// canonical, the content type is a bare lowercased media type, and query
/// parameter names are distinct.
#[derive(Debug, Clone)]
pub struct RequestShape {
    pub method: String,
    pub content_type: Option<String>,
    pub query_params: Vec<String>,
    pub header_names: Vec<String>,
    pub body_size: u64,
}

/// Serialized as a single pretty-printed JSON object; the sets use
/// `name -> true` maps so the artifact diffs cleanly between learn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub route_id: String,
    pub policy: String,
    pub generated_at: DateTime<Utc>,
    pub samples: u64,
    pub methods: BTreeMap<String, bool>,
    pub content_types: BTreeMap<String, bool>,
    pub query_params: BTreeMap<String, bool>,
    pub header_names: BTreeMap<String, bool>,
    pub max_body_bytes: u64,
    #[serde(rename = "observed_max_body_bytes")]
    pub observed_max: u64,
}

impl Contract {
    pub fn new(route_id: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            policy: policy.into(),
            generated_at: Utc::now(),
            samples: 0,
            methods: BTreeMap::new(),
            content_types: BTreeMap::new(),
            query_params: BTreeMap::new(),
            header_names: BTreeMap::new(),
            max_body_bytes: 0,
            observed_max: 0,
        }
    }

    /// Record one request. Sets only ever grow; `samples` strictly increases.
    pub fn observe(&mut self, shape: &RequestShape) {
        self.samples += 1;
        self.methods.insert(shape.method.clone(), true);

        if let Some(content_type) = &shape.content_type {
            self.content_types.insert(content_type.clone(), true);
        }
        for name in &shape.query_params {
            self.query_params.insert(name.clone(), true);
        }
        for name in &shape.header_names {
            self.header_names.insert(name.clone(), true);
        }
        if shape.body_size > self.observed_max {
            self.observed_max = shape.body_size;
        }
    }

    /// Fix the enforced body ceiling from what was observed plus a margin.
    pub fn finalize(&mut self, margin_bytes: u64) {
        self.max_body_bytes = self.observed_max + margin_bytes;
    }
}

/// Lowercase the media type and strip parameters: `Text/HTML; charset=utf-8`
/// becomes `text/html`. Empty values yield `None`.
pub fn parse_media_type(value: &str) -> Option<String> {
    let media = value.split(';').next()?.trim().to_lowercase();
    if media.is_empty() {
        None
    } else {
        Some(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(method: &str, content_type: Option<&str>, body_size: u64) -> RequestShape {
        RequestShape {
            method: method.to_string(),
            content_type: content_type.map(str::to_string),
            query_params: vec!["q".to_string()],
            header_names: vec!["X-Test".to_string()],
            body_size,
        }
    }

    #[test]
    fn observe_grows_sets_monotonically() {
        let mut contract = Contract::new("route-0", "default");
        contract.observe(&shape("GET", Some("application/json"), 10));
        assert_eq!(contract.samples, 1);
        assert!(contract.methods.contains_key("GET"));
        assert!(contract.content_types.contains_key("application/json"));
        assert!(contract.query_params.contains_key("q"));
        assert!(contract.header_names.contains_key("X-Test"));
        assert_eq!(contract.observed_max, 10);

        let before_methods = contract.methods.clone();
        contract.observe(&shape("POST", None, 4));
        assert_eq!(contract.samples, 2);
        // Supersets of previous values; max does not shrink.
        for key in before_methods.keys() {
            assert!(contract.methods.contains_key(key));
        }
        assert_eq!(contract.observed_max, 10);
    }

    #[test]
    fn finalize_adds_margin_to_observed_max() {
        let mut contract = Contract::new("route-0", "default");
        contract.observe(&shape("GET", None, 100));
        contract.finalize(1024);
        assert_eq!(contract.max_body_bytes, 1124);
    }

    #[test]
    fn media_type_parsing() {
        assert_eq!(
            parse_media_type("Application/JSON; charset=utf-8").as_deref(),
            Some("application/json")
        );
        assert_eq!(parse_media_type("text/plain").as_deref(), Some("text/plain"));
        assert_eq!(parse_media_type(""), None);
        assert_eq!(parse_media_type(" ; charset=utf-8"), None);
    }

    #[test]
    fn enforcement_levels_are_ordered() {
        assert!(Enforcement::Lenient < Enforcement::Moderate);
        assert!(Enforcement::Moderate < Enforcement::Strict);
    }
}
