//! Contract evaluation in enforce mode.

use serde::{Deserialize, Serialize};

use crate::contract::{Contract, Enforcement, RequestShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MethodUnexpected,
    ContentTypeUnexpected,
    QueryParamUnexpected,
    HeaderUnexpected,
    BodySizeExceeded,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MethodUnexpected => "method_unexpected",
            ViolationKind::ContentTypeUnexpected => "content_type_unexpected",
            ViolationKind::QueryParamUnexpected => "query_param_unexpected",
            ViolationKind::HeaderUnexpected => "header_unexpected",
            ViolationKind::BodySizeExceeded => "body_size_exceeded",
        }
    }
}

/// One divergence between a request and its route contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub field: String,
}

/// Compare a request against the contract at the given enforcement level.
/// Empty sets are treated as "no expectation" rather than "nothing allowed".
pub fn evaluate(
    contract: &Contract,
    shape: &RequestShape,
    enforcement: Enforcement,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !contract.methods.is_empty() && !contract.methods.contains_key(&shape.method) {
        violations.push(Violation {
            kind: ViolationKind::MethodUnexpected,
            field: shape.method.clone(),
        });
    }

    if !contract.content_types.is_empty() {
        if let Some(content_type) = &shape.content_type {
            if !contract.content_types.contains_key(content_type) {
                violations.push(Violation {
                    kind: ViolationKind::ContentTypeUnexpected,
                    field: content_type.clone(),
                });
            }
        }
    }

    if enforcement >= Enforcement::Moderate {
        for name in &shape.query_params {
            if !contract.query_params.contains_key(name) {
                violations.push(Violation {
                    kind: ViolationKind::QueryParamUnexpected,
                    field: name.clone(),
                });
            }
        }
    }

    if enforcement >= Enforcement::Strict {
        for name in &shape.header_names {
            if !contract.header_names.contains_key(name) {
                violations.push(Violation {
                    kind: ViolationKind::HeaderUnexpected,
                    field: name.clone(),
                });
            }
        }
    }

    if contract.max_body_bytes > 0 && shape.body_size > contract.max_body_bytes {
        violations.push(Violation {
            kind: ViolationKind::BodySizeExceeded,
            field: "body".to_string(),
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learned_contract() -> Contract {
        let mut contract = Contract::new("route-0", "default");
        contract.methods.insert("GET".to_string(), true);
        contract
            .content_types
            .insert("application/json".to_string(), true);
        contract.query_params.insert("q".to_string(), true);
        contract.header_names.insert("X-Test".to_string(), true);
        contract.max_body_bytes = 10;
        contract
    }

    fn divergent_shape() -> RequestShape {
        RequestShape {
            method: "POST".to_string(),
            content_type: Some("text/plain".to_string()),
            query_params: vec!["q".to_string(), "debug".to_string()],
            header_names: vec!["X-Test".to_string(), "X-Extra".to_string()],
            body_size: 20,
        }
    }

    #[test]
    fn lenient_reports_method_content_type_and_body_size() {
        let violations = evaluate(&learned_contract(), &divergent_shape(), Enforcement::Lenient);
        assert_eq!(violations.len(), 3);
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::MethodUnexpected));
        assert!(kinds.contains(&ViolationKind::ContentTypeUnexpected));
        assert!(kinds.contains(&ViolationKind::BodySizeExceeded));
    }

    #[test]
    fn moderate_adds_query_params() {
        let violations = evaluate(&learned_contract(), &divergent_shape(), Enforcement::Moderate);
        assert_eq!(violations.len(), 4);
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::QueryParamUnexpected && v.field == "debug"));
    }

    #[test]
    fn strict_adds_headers() {
        let violations = evaluate(&learned_contract(), &divergent_shape(), Enforcement::Strict);
        assert_eq!(violations.len(), 5);
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::HeaderUnexpected && v.field == "X-Extra"));
    }

    #[test]
    fn empty_sets_carry_no_expectation() {
        let contract = Contract::new("route-0", "default");
        let violations = evaluate(&contract, &divergent_shape(), Enforcement::Strict);
        // Even strict has nothing to flag against an empty contract,
        // and max_body_bytes == 0 disables the size check.
        assert!(violations.is_empty());
    }

    #[test]
    fn matching_request_produces_no_violations() {
        let shape = RequestShape {
            method: "GET".to_string(),
            content_type: Some("application/json".to_string()),
            query_params: vec!["q".to_string()],
            header_names: vec!["X-Test".to_string()],
            body_size: 5,
        };
        assert!(evaluate(&learned_contract(), &shape, Enforcement::Strict).is_empty());
    }

    #[test]
    fn violation_serializes_with_type_field() {
        let violation = Violation {
            kind: ViolationKind::MethodUnexpected,
            field: "POST".to_string(),
        };
        let json = serde_json::to_string(&violation).unwrap();
        assert_eq!(json, r#"{"type":"method_unexpected","field":"POST"}"#);
    }
}
