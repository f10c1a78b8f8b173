//! YAML configuration schema and loading.
//!
//! The whole gateway is driven by a single YAML document: listener, upstreams,
//! routes, named policies, detection rules, logging and metrics. Everything is
//! immutable after [`Config::load`]; relative paths inside the document resolve
//! against the directory containing the config file.

pub mod validate;

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::ratelimit::KeyMode;
use crate::rules::{MatchKind, Phase, Transform};

/// Per-policy operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Observe traffic and accumulate the route contract.
    Learn,
    /// Apply contracts and rules; block on violations.
    Enforce,
    /// Compute everything, never act.
    Shadow,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Learn => "learn",
            Mode::Enforce => "enforce",
            Mode::Shadow => "shadow",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub config_version: u32,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub policies: BTreeMap<String, Policy>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    #[serde(rename = "match", default)]
    pub matcher: RouteMatch,
    #[serde(default)]
    pub upstream: String,
    #[serde(default)]
    pub policy: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub mode: Mode,
    #[serde(default)]
    pub anomaly_threshold: i64,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    #[serde(default)]
    pub max_body_bytes: u64,
    #[serde(default)]
    pub max_header_bytes: u64,
    #[serde(default, deserialize_with = "duration_str::deserialize")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub min_samples: u64,
    #[serde(default)]
    pub enforcement: crate::contract::Enforcement,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub key: KeyMode,
    #[serde(default)]
    pub rps: f64,
    #[serde(default)]
    pub burst: u32,
    /// 0 selects the default rate-limit status (429).
    #[serde(default)]
    pub status_code: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionsConfig {
    /// 0 selects the default block status (403).
    #[serde(default)]
    pub block_status_code: u16,
    #[serde(default)]
    pub block_body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub id: String,
    pub phase: Phase,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(rename = "match")]
    pub matcher: RuleMatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatchConfig {
    #[serde(rename = "type")]
    pub kind: MatchKind,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub patterns_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub decision_log: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub listen: String,
}

impl Config {
    /// Load and parse a config file; the file's directory becomes the base for
    /// relative paths referenced by the document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        let abs = path.canonicalize()?;
        config.base_dir = abs.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a path from the document against the config file's directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if path.is_empty() || p.is_absolute() || self.base_dir.as_os_str().is_empty() {
            return p.to_path_buf();
        }
        self.base_dir.join(p)
    }

    /// Apply CLI-level overrides to every policy (mode and/or contract path).
    pub fn apply_overrides(&mut self, mode: Option<Mode>, contract_path: Option<&Path>) {
        for policy in self.policies.values_mut() {
            if let Some(mode) = mode {
                policy.mode = mode;
            }
            if let Some(path) = contract_path {
                policy.contract.path = path.display().to_string();
            }
        }
    }
}

/// Parse a listen address, accepting the `":8080"` shorthand for all
/// interfaces.
pub fn parse_listen_addr(addr: &str) -> std::io::Result<SocketAddr> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "address is required",
        ));
    }
    let candidate = if trimmed.starts_with(':') {
        format!("0.0.0.0{trimmed}")
    } else {
        trimmed.to_string()
    };
    candidate.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "address did not resolve")
    })
}

/// Parse a human duration such as `250ms`, `2s`, `1.5m` or `1h`.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| format!("duration {input:?} is missing a unit (ms|s|m|h)"))?;
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;
    if value < 0.0 || !value.is_finite() {
        return Err(format!("invalid duration {input:?}"));
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("unknown duration unit {unit:?}")),
    };
    Ok(Duration::from_secs_f64(secs))
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
configVersion: 1
server:
  listen: ":8080"
upstreams:
  - name: app
    url: http://127.0.0.1:9000
routes:
  - match:
      host: example.com
      pathPrefix: /api
    upstream: app
    policy: default
policies:
  default:
    mode: shadow
    anomalyThreshold: 5
    limits:
      maxBodyBytes: 1048576
      maxHeaderBytes: 8192
      timeout: 2s
    contract:
      path: contracts/default.json
      minSamples: 10
      enforcement: moderate
    rateLimit:
      enabled: true
      key: ip_path
      rps: 5
      burst: 10
rules:
  - id: xss-1
    phase: query
    score: 5
    tags: [xss]
    transforms: [lowercase]
    match:
      type: regex
      pattern: "(?i)<script>"
logging:
  level: info
  decisionLog: logs/decisions.jsonl
metrics:
  enabled: true
  listen: ":9102"
"#;

    #[test]
    fn load_parses_full_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wardgate.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.config_version, 1);
        assert_eq!(config.upstreams[0].name, "app");
        assert_eq!(config.routes[0].matcher.path_prefix, "/api");

        let policy = &config.policies["default"];
        assert_eq!(policy.mode, Mode::Shadow);
        assert_eq!(policy.limits.timeout, Duration::from_secs(2));
        assert_eq!(policy.rate_limit.key, KeyMode::IpPath);
        assert_eq!(
            policy.contract.enforcement,
            crate::contract::Enforcement::Moderate
        );

        assert_eq!(config.rules[0].phase, Phase::Query);
        assert_eq!(config.rules[0].transforms, vec![Transform::Lowercase]);

        // Relative paths resolve against the config directory.
        let resolved = config.resolve_path(&config.logging.decision_log);
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn unknown_mode_is_rejected_at_parse() {
        let err = serde_yaml::from_str::<Config>("policies:\n  p:\n    mode: audit\n");
        assert!(err.is_err());
    }

    #[test]
    fn apply_overrides_touches_every_policy() {
        let mut config: Config =
            serde_yaml::from_str("policies:\n  a:\n    mode: learn\n  b:\n    mode: shadow\n")
                .unwrap();
        config.apply_overrides(Some(Mode::Enforce), Some(Path::new("/tmp/c.json")));
        for policy in config.policies.values() {
            assert_eq!(policy.mode, Mode::Enforce);
            assert_eq!(policy.contract.path, "/tmp/c.json");
        }
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("-2s").is_err());
        assert!(parse_duration("2d").is_err());
    }

    #[test]
    fn listen_addr_shorthand() {
        assert!(parse_listen_addr(":8080").is_ok());
        assert!(parse_listen_addr("127.0.0.1:8080").is_ok());
        assert!(parse_listen_addr("").is_err());
    }
}
