//! # Wardgate
//!
//! **Reverse-proxy security gateway.**
//!
//! Wardgate sits in front of HTTP backends and evaluates every request
//! through a fixed pipeline: route resolution, byte/time limit gates,
//! pattern-rule scoring, a learned per-route *contract* of expected shape,
//! and per-client token-bucket rate limiting. Each policy runs in one of
//! three modes — `learn` (build contracts), `enforce` (block on violations),
//! `shadow` (compute but never act) — and every request ends as a structured
//! decision record plus Prometheus metrics.
//!
//! ## Architecture
//!
//! - **[`config`]** — YAML schema, loading and full validation
//! - **[`gateway`]** — router, request pipeline and shared state
//! - **[`rules`]** — phase-targeted detection rules (regex / Aho–Corasick)
//! - **[`normalize`]** — percent/entity decoding and path canonicalization
//! - **[`contract`]** — learned route contracts: observe, evaluate, persist
//! - **[`ratelimit`]** — per-key token buckets
//! - **[`policy`]** — mode/score/threshold action decision
//! - **[`proxy`]** — upstream dispatch with deadline-aware transport
//! - **[`logging`]** — JSONL decision sink
//! - **[`observability`]** — Prometheus counters and latency histogram
//! - **[`redact`]** — secret redaction for everything that reaches a log
//! - **[`report`]** — decision-log summarization tool
//! - **[`cli`]** — command-line surface (clap)
//! - **[`error`]** — unified error types using `thiserror`

pub mod cli;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod normalize;
pub mod observability;
pub mod policy;
pub mod proxy;
pub mod ratelimit;
pub mod redact;
pub mod report;
pub mod rules;
