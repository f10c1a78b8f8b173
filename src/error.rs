//! Unified error handling for the wardgate library.
//!
//! Uses [`thiserror`] to define a single error enum covering the failure modes
//! that can terminate startup: configuration loading and validation, rule and
//! matcher compilation, upstream URL parsing, and contract I/O. Library code
//! returns [`Result<T>`] which aliases `std::result::Result<T, GatewayError>`.
//!
//! The binary (`main.rs`) uses [`anyhow`] for top-level error propagation.
//! Request-scoped failures never surface through this type; the handler maps
//! them to HTTP responses locally.

use thiserror::Error;

/// Unified error type for the wardgate library.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// File I/O error (config read, pattern file, decision log open).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parsing error.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error (contracts, decisions).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex compilation error.
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Multi-pattern matcher build error.
    #[error("pattern matcher: {0}")]
    PatternBuild(String),

    /// Configuration validation failed; one problem per entry, sorted.
    #[error("{} validation error(s)", .0.len())]
    Validation(Vec<String>),

    /// A rule failed to compile, annotated with its id.
    #[error("rule {id}: {source}")]
    Rule {
        id: String,
        #[source]
        source: Box<GatewayError>,
    },

    /// An upstream target could not be built.
    #[error("upstream {name}: {message}")]
    Upstream { name: String, message: String },

    /// A contract artifact could not be read or written.
    #[error("contract {path}: {source}")]
    Contract {
        path: String,
        #[source]
        source: Box<GatewayError>,
    },

    /// HTTP client construction error.
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    /// Metrics exporter setup error.
    #[error("metrics exporter: {0}")]
    Metrics(String),

    /// Learn-mode finalization failure (missing samples, poisoned state).
    #[error("learn: {0}")]
    Learn(String),
}

/// Convenience type alias for `std::result::Result<T, GatewayError>`.
pub type Result<T> = std::result::Result<T, GatewayError>;
