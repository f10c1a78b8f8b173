//! Rule compilation from configuration.

use std::path::Path;

use crate::config::{Config, RuleConfig};
use crate::error::{GatewayError, Result};
use crate::rules::{Engine, MatchKind, Matcher, Rule, Transform};

/// Compile every configured rule, preserving order. Any failure aborts the
/// build with the offending rule id attached.
pub fn build_engine(config: &Config) -> Result<Engine> {
    let mut rules = Vec::with_capacity(config.rules.len());
    for raw in &config.rules {
        let rule = compile_rule(raw, config).map_err(|err| GatewayError::Rule {
            id: raw.id.clone(),
            source: Box::new(err),
        })?;
        rules.push(rule);
    }
    Ok(Engine::new(rules))
}

fn compile_rule(raw: &RuleConfig, config: &Config) -> Result<Rule> {
    let matcher = match raw.matcher.kind {
        MatchKind::Regex => {
            if raw.matcher.pattern.is_empty() {
                return Err(GatewayError::PatternBuild(
                    "regex pattern is required".to_string(),
                ));
            }
            Matcher::regex(&raw.matcher.pattern)?
        }
        MatchKind::Aho => {
            if raw.matcher.patterns_file.is_empty() {
                return Err(GatewayError::PatternBuild(
                    "patternsFile is required".to_string(),
                ));
            }
            let path = config.resolve_path(&raw.matcher.patterns_file);
            let mut patterns = read_patterns(&path)?;
            // Pattern text must agree with the transformed input.
            if raw.transforms.contains(&Transform::Lowercase) {
                patterns = patterns.into_iter().map(|p| p.to_lowercase()).collect();
            }
            Matcher::aho(patterns)?
        }
    };

    Ok(Rule {
        id: raw.id.clone(),
        phase: raw.phase,
        score: raw.score,
        tags: raw.tags.clone(),
        transforms: raw.transforms.clone(),
        matcher,
    })
}

/// One pattern per line; blank lines and `#` comments are skipped.
fn read_patterns(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_rules(yaml_rules: &str) -> Config {
        serde_yaml::from_str(&format!("rules:\n{yaml_rules}")).unwrap()
    }

    #[test]
    fn builds_regex_rule() {
        let config = config_with_rules(
            "  - id: xss-1\n    phase: query\n    score: 5\n    tags: [xss]\n    transforms: [lowercase]\n    match:\n      type: regex\n      pattern: \"<script>\"\n",
        );
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rules()[0].id, "xss-1");
    }

    #[test]
    fn builds_aho_rule_from_pattern_file() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = dir.path().join("sqli.txt");
        let mut file = std::fs::File::create(&patterns).unwrap();
        writeln!(file, "# SQL injection signatures").unwrap();
        writeln!(file, "OR 1=1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "union select").unwrap();

        let config = config_with_rules(&format!(
            "  - id: sqli-1\n    phase: query\n    score: 3\n    transforms: [lowercase]\n    match:\n      type: aho\n      patternsFile: {}\n",
            patterns.display()
        ));
        let engine = build_engine(&config).unwrap();

        // Lowercase transform lowercases the patterns too.
        let evidence = engine.rules()[0].matcher.find("q=1 or 1=1").unwrap();
        assert_eq!(evidence, "or 1=1");
    }

    #[test]
    fn missing_pattern_file_fails_with_rule_id() {
        let config = config_with_rules(
            "  - id: sqli-2\n    phase: query\n    match:\n      type: aho\n      patternsFile: /nonexistent/patterns.txt\n",
        );
        let err = build_engine(&config).unwrap_err();
        assert!(err.to_string().starts_with("rule sqli-2:"));
    }

    #[test]
    fn empty_regex_pattern_rejected() {
        let config = config_with_rules(
            "  - id: r\n    phase: body\n    match:\n      type: regex\n",
        );
        assert!(build_engine(&config).is_err());
    }
}
