//! Configuration validation.
//!
//! Collects every problem instead of stopping at the first, so `validate`
//! can print the complete list (sorted, one per line). A non-empty problem
//! list becomes [`GatewayError::Validation`].

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::Path;

use crate::config::{parse_listen_addr, Config, Mode};
use crate::error::{GatewayError, Result};
use crate::rules::MatchKind;

impl Config {
    /// Validate the whole document; returns all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.config_version != 1 {
            problems.push("configVersion must be 1".to_string());
        }

        if let Err(err) = parse_listen_addr(&self.server.listen) {
            problems.push(format!("server.listen invalid: {err}"));
        }

        if self.server.tls.enabled {
            if self.server.tls.cert_file.is_empty() {
                problems.push("server.tls.certFile required when tls.enabled is true".to_string());
            } else if let Err(err) = require_file(&self.resolve_path(&self.server.tls.cert_file)) {
                problems.push(format!("server.tls.certFile invalid: {err}"));
            }
            if self.server.tls.key_file.is_empty() {
                problems.push("server.tls.keyFile required when tls.enabled is true".to_string());
            } else if let Err(err) = require_file(&self.resolve_path(&self.server.tls.key_file)) {
                problems.push(format!("server.tls.keyFile invalid: {err}"));
            }
        }

        if self.metrics.enabled {
            if let Err(err) = parse_listen_addr(&self.metrics.listen) {
                problems.push(format!("metrics.listen invalid: {err}"));
            }
        }

        let mut upstream_names = BTreeSet::new();
        for (i, upstream) in self.upstreams.iter().enumerate() {
            if upstream.name.is_empty() {
                problems.push(format!("upstreams[{i}].name is required"));
            } else if !upstream_names.insert(upstream.name.as_str()) {
                problems.push(format!(
                    "upstreams[{i}].name {:?} is duplicated",
                    upstream.name
                ));
            }

            if upstream.url.is_empty() {
                problems.push(format!("upstreams[{i}].url is required"));
            } else if let Err(err) = validate_url(&upstream.url) {
                problems.push(format!("upstreams[{i}].url invalid: {err}"));
            }
        }

        for (name, policy) in &self.policies {
            if name.is_empty() {
                problems.push("policies has an empty name".to_string());
                continue;
            }

            if policy.anomaly_threshold < 0 {
                problems.push(format!("policies.{name}.anomalyThreshold must be >= 0"));
            }
            if policy.limits.max_body_bytes == 0 {
                problems.push(format!("policies.{name}.limits.maxBodyBytes must be > 0"));
            }
            if policy.limits.max_header_bytes == 0 {
                problems.push(format!("policies.{name}.limits.maxHeaderBytes must be > 0"));
            }
            if policy.limits.timeout.is_zero() {
                problems.push(format!("policies.{name}.limits.timeout must be > 0"));
            }

            if policy.contract.path.is_empty() {
                problems.push(format!("policies.{name}.contract.path is required"));
            } else if let Err(err) =
                self.validate_contract_path(policy.mode, &policy.contract.path)
            {
                problems.push(format!("policies.{name}.contract.path invalid: {err}"));
            }

            if policy.rate_limit.enabled {
                if policy.rate_limit.rps <= 0.0 {
                    problems.push(format!("policies.{name}.rateLimit.rps must be > 0"));
                }
                if policy.rate_limit.burst == 0 {
                    problems.push(format!("policies.{name}.rateLimit.burst must be > 0"));
                }
            }
        }

        for (i, route) in self.routes.iter().enumerate() {
            if route.matcher.path_prefix.is_empty() {
                problems.push(format!("routes[{i}].match.pathPrefix is required"));
            }
            if route.upstream.is_empty() {
                problems.push(format!("routes[{i}].upstream is required"));
            } else if !upstream_names.contains(route.upstream.as_str()) {
                problems.push(format!(
                    "routes[{i}].upstream {:?} does not exist",
                    route.upstream
                ));
            }
            if route.policy.is_empty() {
                problems.push(format!("routes[{i}].policy is required"));
            } else if !self.policies.contains_key(&route.policy) {
                problems.push(format!("routes[{i}].policy {:?} does not exist", route.policy));
            }
        }

        let mut rule_ids = BTreeSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.id.is_empty() {
                problems.push(format!("rules[{i}].id is required"));
            } else if !rule_ids.insert(rule.id.as_str()) {
                problems.push(format!("rules[{i}].id {:?} is duplicated", rule.id));
            }

            match rule.matcher.kind {
                MatchKind::Aho => {
                    if rule.matcher.patterns_file.is_empty() {
                        problems.push(format!("rules[{i}].match.patternsFile is required for aho"));
                    } else if let Err(err) =
                        require_file(&self.resolve_path(&rule.matcher.patterns_file))
                    {
                        problems.push(format!("rules[{i}].match.patternsFile invalid: {err}"));
                    }
                }
                MatchKind::Regex => {
                    if rule.matcher.pattern.is_empty() {
                        problems.push(format!("rules[{i}].match.pattern is required for regex"));
                    } else if let Err(err) = regex::Regex::new(&rule.matcher.pattern) {
                        problems.push(format!("rules[{i}].match.pattern invalid: {err}"));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(GatewayError::Validation(problems))
        }
    }

    fn validate_contract_path(&self, mode: Mode, path: &str) -> std::io::Result<()> {
        let resolved = self.resolve_path(path);
        match mode {
            Mode::Learn => ensure_writable(&resolved),
            Mode::Enforce => ensure_readable(&resolved),
            Mode::Shadow => Ok(()),
        }
    }
}

fn validate_url(raw: &str) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|err| err.to_string())?;
    if parsed.scheme().is_empty() || !parsed.has_host() {
        return Err("must include scheme and host".to_string());
    }
    Ok(())
}

fn require_file(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        ));
    }
    Ok(())
}

fn ensure_readable(path: &Path) -> std::io::Result<()> {
    std::fs::File::open(path).map(drop)
}

// Learn mode needs the contract destination writable before the run starts.
fn ensure_writable(path: &Path) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    let meta = std::fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", dir.display()),
        ));
    }
    let probe = dir.join(".wardgate-validate");
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map(drop)?;
    std::fs::remove_file(&probe)
}
