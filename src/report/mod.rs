//! Decision-log summarization.
//!
//! Reads a JSONL decision log, aggregates totals, top offenders and latency
//! percentiles, and renders the summary as text, markdown or pretty JSON.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::logging::Decision;
use crate::policy::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Md,
    Json,
}

#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub allowed: usize,
    pub blocked: usize,
    pub shadowed: usize,
    pub rate_limited: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub top_rules: Vec<CountItem>,
    pub top_contracts: Vec<CountItem>,
    pub top_rate_limits: Vec<CountItem>,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountItem {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct LatencySummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

const TOP_N: usize = 5;

/// Read decisions from a JSONL file, skipping blank lines and anything older
/// than `since`.
pub fn read_decisions(path: &Path, since: Option<DateTime<Utc>>) -> Result<Vec<Decision>> {
    let content = std::fs::read_to_string(path)?;
    let mut decisions = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let decision: Decision = serde_json::from_str(line)?;
        if let Some(since) = since {
            if decision.timestamp < since {
                continue;
            }
        }
        decisions.push(decision);
    }
    Ok(decisions)
}

pub fn summarize(decisions: &[Decision]) -> Summary {
    let mut summary = Summary::default();
    if decisions.is_empty() {
        return summary;
    }

    let mut rule_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut contract_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut ratelimit_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut latencies = Vec::with_capacity(decisions.len());

    for decision in decisions {
        summary.total += 1;

        summary.start = Some(match summary.start {
            Some(start) => start.min(decision.timestamp),
            None => decision.timestamp,
        });
        summary.end = Some(match summary.end {
            Some(end) => end.max(decision.timestamp),
            None => decision.timestamp,
        });

        match decision.action {
            Action::Allow => summary.allowed += 1,
            Action::Block => summary.blocked += 1,
            Action::Shadow => summary.shadowed += 1,
        }

        if decision.rate_limited {
            summary.rate_limited += 1;
            *ratelimit_counts
                .entry(decision.client_ip.clone())
                .or_default() += 1;
        }

        for matched in &decision.matched_rules {
            *rule_counts.entry(matched.id.clone()).or_default() += 1;
        }
        for violation in &decision.contract_violations {
            *contract_counts
                .entry(violation.kind.as_str().to_string())
                .or_default() += 1;
        }

        latencies.push(decision.duration_ms);
    }

    summary.top_rules = top_counts(rule_counts);
    summary.top_contracts = top_counts(contract_counts);
    summary.top_rate_limits = top_counts(ratelimit_counts);
    summary.latency = latency_summary(&mut latencies);

    summary
}

/// Highest counts first; equal counts sort by key so output is stable.
fn top_counts(counts: BTreeMap<String, usize>) -> Vec<CountItem> {
    let mut items: Vec<CountItem> = counts
        .into_iter()
        .map(|(key, count)| CountItem { key, count })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    items.truncate(TOP_N);
    items
}

fn latency_summary(values: &mut [i64]) -> LatencySummary {
    if values.is_empty() {
        return LatencySummary::default();
    }
    values.sort_unstable();
    LatencySummary {
        p50: percentile(values, 0.50),
        p95: percentile(values, 0.95),
        p99: percentile(values, 0.99),
    }
}

fn percentile(sorted: &[i64], p: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx.min(sorted.len() - 1)] as f64
}

pub fn render_text(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total: {}\n", summary.total));
    out.push_str(&format!("Allowed: {}\n", summary.allowed));
    out.push_str(&format!("Blocked: {}\n", summary.blocked));
    out.push_str(&format!("Shadowed: {}\n", summary.shadowed));
    out.push_str(&format!("Rate limited: {}\n", summary.rate_limited));
    out.push_str(&format!(
        "Latency p50/p95/p99 (ms): {:.0}/{:.0}/{:.0}\n",
        summary.latency.p50, summary.latency.p95, summary.latency.p99
    ));

    write_counts(&mut out, "Top blocked rules", &summary.top_rules);
    write_counts(&mut out, "Top contract violations", &summary.top_contracts);
    write_counts(&mut out, "Top rate-limited", &summary.top_rate_limits);

    out
}

pub fn render_markdown(summary: &Summary) -> String {
    let mut out = String::from("# Gateway Report\n\n## Totals\n\n");
    out.push_str(&format!("- Total: {}\n", summary.total));
    out.push_str(&format!("- Allowed: {}\n", summary.allowed));
    out.push_str(&format!("- Blocked: {}\n", summary.blocked));
    out.push_str(&format!("- Shadowed: {}\n", summary.shadowed));
    out.push_str(&format!("- Rate limited: {}\n", summary.rate_limited));
    out.push_str(&format!(
        "- Latency p50/p95/p99 (ms): {:.0}/{:.0}/{:.0}\n\n",
        summary.latency.p50, summary.latency.p95, summary.latency.p99
    ));

    write_counts_markdown(&mut out, "Top blocked rules", &summary.top_rules);
    write_counts_markdown(&mut out, "Top contract violations", &summary.top_contracts);
    write_counts_markdown(&mut out, "Top rate-limited", &summary.top_rate_limits);

    out
}

pub fn render_json(summary: &Summary) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(summary)?)
}

fn write_counts(out: &mut String, title: &str, items: &[CountItem]) {
    if items.is_empty() {
        out.push_str(&format!("{title}: none\n"));
        return;
    }
    out.push_str(&format!("{title}:\n"));
    for item in items {
        out.push_str(&format!("- {}: {}\n", item.key, item.count));
    }
}

fn write_counts_markdown(out: &mut String, title: &str, items: &[CountItem]) {
    out.push_str(&format!("## {title}\n\n"));
    if items.is_empty() {
        out.push_str("- none\n\n");
        return;
    }
    for item in items {
        out.push_str(&format!("- {}: {}\n", item.key, item.count));
    }
    out.push('\n');
}

/// Write to `path` (mode 0600) or stdout when no path is given.
pub fn write_output(path: Option<&Path>, content: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?;
            file.write_all(content)?;
            Ok(())
        }
        None => {
            std::io::stdout().write_all(content)?;
            Ok(())
        }
    }
}
