//! Rule evaluation.
//!
//! Rules run in configured order against an [`EvalContext`]. Scores are
//! additive and evaluation never short-circuits: a request that trips three
//! rules reports all three matches. Evaluation is pure, so one engine serves
//! every request task without synchronization.

use crate::normalize;
use crate::rules::{EvalContext, EvalResult, Phase, Rule, RuleMatch, Transform};

#[derive(Debug)]
pub struct Engine {
    rules: Vec<Rule>,
}

impl Engine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// True if any rule inspects the body phase; the handler buffers request
    /// bodies only when this holds (or a contract needs the size).
    pub fn has_body_rules(&self) -> bool {
        self.rules.iter().any(|rule| rule.phase == Phase::Body)
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> EvalResult {
        let mut result = EvalResult::default();

        for rule in &self.rules {
            let input = phase_input(ctx, rule.phase);
            let normalized = apply_transforms(input, &rule.transforms);
            let Some(evidence) = rule.matcher.find(&normalized) else {
                continue;
            };

            result.score += rule.score;
            result.matches.push(RuleMatch {
                rule_id: rule.id.clone(),
                phase: rule.phase,
                score: rule.score,
                tags: rule.tags.clone(),
                evidence,
            });
        }

        result
    }
}

fn phase_input<'a>(ctx: &'a EvalContext, phase: Phase) -> &'a str {
    match phase {
        Phase::RequestLine => &ctx.request_line,
        Phase::Headers => &ctx.headers,
        Phase::Query => &ctx.query,
        Phase::Body => &ctx.body,
    }
}

fn apply_transforms(input: &str, transforms: &[Transform]) -> String {
    let mut opts = normalize::Options::default();
    for transform in transforms {
        match transform {
            Transform::Lowercase => opts.lowercase = true,
            Transform::HtmlEntity => opts.html_entity = true,
            Transform::NormalizePath => opts.normalize_path = true,
        }
    }
    normalize::apply(input, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Matcher;

    fn rule(id: &str, phase: Phase, score: i64, transforms: Vec<Transform>, matcher: Matcher) -> Rule {
        Rule {
            id: id.to_string(),
            phase,
            score,
            tags: vec!["test".to_string()],
            transforms,
            matcher,
        }
    }

    fn query_ctx(query: &str) -> EvalContext {
        EvalContext {
            query: query.to_string(),
            ..EvalContext::default()
        }
    }

    #[test]
    fn encoded_script_tag_matches_after_transforms() {
        let engine = Engine::new(vec![rule(
            "xss-1",
            Phase::Query,
            5,
            vec![Transform::Lowercase],
            Matcher::regex("(?i)<script>").unwrap(),
        )]);

        let result = engine.evaluate(&query_ctx("%3CScRipT%3E"));
        assert_eq!(result.score, 5);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].evidence, "<script>");
        assert_eq!(result.matches[0].tags, vec!["test"]);
    }

    #[test]
    fn aho_rule_matches_mixed_case_with_lowercase_transform() {
        let engine = Engine::new(vec![rule(
            "sqli-1",
            Phase::Query,
            3,
            vec![Transform::Lowercase],
            Matcher::aho(vec!["or 1=1".into()]).unwrap(),
        )]);

        let result = engine.evaluate(&query_ctx("q=1 Or 1=1"));
        assert_eq!(result.score, 3);
        assert_eq!(result.matches[0].rule_id, "sqli-1");
    }

    #[test]
    fn scores_are_additive_and_ordered() {
        let engine = Engine::new(vec![
            rule(
                "a",
                Phase::Query,
                2,
                vec![],
                Matcher::regex("foo").unwrap(),
            ),
            rule(
                "b",
                Phase::Query,
                3,
                vec![],
                Matcher::regex("bar").unwrap(),
            ),
            rule(
                "c",
                Phase::Body,
                7,
                vec![],
                Matcher::regex("baz").unwrap(),
            ),
        ]);

        let ctx = EvalContext {
            query: "foo bar".to_string(),
            body: "clean".to_string(),
            ..EvalContext::default()
        };
        let result = engine.evaluate(&ctx);
        assert_eq!(result.score, 5);
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].rule_id, "a");
        assert_eq!(result.matches[1].rule_id, "b");
    }

    #[test]
    fn path_traversal_caught_through_normalize_path() {
        let engine = Engine::new(vec![rule(
            "trav-1",
            Phase::RequestLine,
            4,
            vec![Transform::NormalizePath],
            Matcher::regex("/etc/passwd").unwrap(),
        )]);

        let result = engine.evaluate(&EvalContext {
            request_line: "/a/%2e%2e/etc/passwd".to_string(),
            ..EvalContext::default()
        });
        assert_eq!(result.score, 4);
    }

    #[test]
    fn has_body_rules_reflects_phases() {
        let without = Engine::new(vec![rule(
            "q",
            Phase::Query,
            1,
            vec![],
            Matcher::regex("x").unwrap(),
        )]);
        assert!(!without.has_body_rules());

        let with = Engine::new(vec![rule(
            "b",
            Phase::Body,
            1,
            vec![],
            Matcher::regex("x").unwrap(),
        )]);
        assert!(with.has_body_rules());
    }
}
