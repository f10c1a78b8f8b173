//! Per-key token-bucket rate limiting.
//!
//! Buckets refill lazily at take time, so there is no background task.
//! One mutex guards the whole map; the critical section is a handful of
//! float operations and never touches I/O. Buckets are created on first
//! use of a key and never evicted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Deserialize;

/// How the per-client bucket key is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    #[default]
    Ip,
    IpPath,
}

impl KeyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMode::Ip => "ip",
            KeyMode::IpPath => "ip_path",
        }
    }
}

/// Build the bucket key for a client under the given mode.
pub fn bucket_key(mode: KeyMode, ip: &str, path: &str) -> String {
    match mode {
        KeyMode::Ip => ip.to_string(),
        KeyMode::IpPath => format!("{ip}|{path}"),
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
    burst: f64,
    rps: f64,
}

#[derive(Debug, Default)]
pub struct Limiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the key's bucket at time `now`. An empty key or
    /// non-positive rps/burst disables limiting and allows the request.
    /// Invariant: `0 <= tokens <= burst` after every call.
    pub fn allow(&self, key: &str, rps: f64, burst: u32, now: Instant) -> bool {
        if key.is_empty() || rps <= 0.0 || burst == 0 {
            return true;
        }
        let burst = f64::from(burst);

        let Ok(mut buckets) = self.buckets.lock() else {
            return true;
        };

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst,
            last: now,
            burst,
            rps,
        });

        // Configuration changed for this key: adopt it and clamp.
        if bucket.rps != rps || bucket.burst != burst {
            bucket.rps = rps;
            bucket.burst = burst;
            if bucket.tokens > burst {
                bucket.tokens = burst;
            }
        }

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * bucket.rps).min(bucket.burst);
        bucket.last = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }
}
