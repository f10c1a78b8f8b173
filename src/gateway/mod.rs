//! The gateway: construction and shared state.
//!
//! Everything assembled here is immutable once [`Gateway::from_config`]
//! returns, with two exceptions: the limiter's bucket map (one mutex) and
//! learn-mode contracts (one mutex each, touched only by requests for their
//! own route). Finalizing and saving contracts happens after the server has
//! stopped accepting requests.

pub mod evalctx;
pub mod handler;
pub mod router;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::RngCore;
use url::Url;

use crate::config::{Config, Mode, Policy};
use crate::contract::{storage, Contract};
use crate::error::{GatewayError, Result};
use crate::logging::DecisionLogger;
use crate::proxy::ProxyClient;
use crate::ratelimit::Limiter;
use crate::rules::{compile, Engine};

use router::Router;

/// Headroom added to the observed body maximum when a contract is finalized.
const DEFAULT_BODY_MARGIN_BYTES: u64 = 1024;

/// Transport fallback when no policy configures a timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A contract is either being learned (mutable, guarded) or enforced
/// (loaded once, read-only).
#[derive(Debug)]
enum ContractSlot {
    Learn(Mutex<Contract>),
    Enforce(Contract),
}

#[derive(Debug)]
pub struct Gateway {
    router: Router,
    policies: HashMap<String, Policy>,
    upstreams: HashMap<String, Url>,
    proxy: ProxyClient,
    engine: Engine,
    contracts: HashMap<String, ContractSlot>,
    limiter: Limiter,
    body_rules: bool,
    decision_log: Option<DecisionLogger>,
    metrics_enabled: bool,
    request_count: AtomicU64,
}

impl Gateway {
    /// Build the full pipeline from a validated config. Contract load
    /// failures and rule compilation failures are startup-fatal.
    pub fn from_config(config: &Config) -> Result<Self> {
        let router = Router::new(config);

        let mut upstreams = HashMap::with_capacity(config.upstreams.len());
        for upstream in &config.upstreams {
            let parsed = Url::parse(&upstream.url).map_err(|err| GatewayError::Upstream {
                name: upstream.name.clone(),
                message: err.to_string(),
            })?;
            upstreams.insert(upstream.name.clone(), parsed);
        }

        let proxy = ProxyClient::new(max_policy_timeout(config))?;
        let engine = compile::build_engine(config)?;

        let mut contracts = HashMap::new();
        for (i, route) in config.routes.iter().enumerate() {
            let route_id = format!("route-{i}");
            let Some(policy) = config.policies.get(&route.policy) else {
                continue;
            };
            match policy.mode {
                Mode::Learn => {
                    contracts.insert(
                        contract_key(&route_id, &route.policy),
                        ContractSlot::Learn(Mutex::new(Contract::new(
                            route_id.clone(),
                            route.policy.clone(),
                        ))),
                    );
                }
                Mode::Enforce => {
                    let path = config.resolve_path(&policy.contract.path);
                    let loaded = storage::load(&path)?;
                    contracts.insert(
                        contract_key(&route_id, &route.policy),
                        ContractSlot::Enforce(loaded),
                    );
                }
                Mode::Shadow => {}
            }
        }

        Ok(Self {
            router,
            policies: config
                .policies
                .iter()
                .map(|(name, policy)| (name.clone(), policy.clone()))
                .collect(),
            upstreams,
            proxy,
            body_rules: engine.has_body_rules(),
            engine,
            contracts,
            limiter: Limiter::new(),
            decision_log: None,
            metrics_enabled: false,
            request_count: AtomicU64::new(0),
        })
    }

    /// Attach the decision sink.
    pub fn with_decision_logger(mut self, logger: DecisionLogger) -> Self {
        self.decision_log = Some(logger);
        self
    }

    /// Enable metrics recording (the exporter is installed separately).
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Snapshot of a route's contract, if one exists.
    pub fn contract_snapshot(&self, route_id: &str, policy: &str) -> Option<Contract> {
        match self.contracts.get(&contract_key(route_id, policy))? {
            ContractSlot::Learn(slot) => slot.lock().ok().map(|contract| contract.clone()),
            ContractSlot::Enforce(contract) => Some(contract.clone()),
        }
    }

    /// Finalize and persist every learn-mode contract. Runs after shutdown;
    /// a save failure is fatal for the learn run.
    pub fn save_contracts(&self, config: &Config) -> Result<()> {
        for (i, route) in config.routes.iter().enumerate() {
            let route_id = format!("route-{i}");
            let Some(policy) = config.policies.get(&route.policy) else {
                continue;
            };
            if policy.mode != Mode::Learn {
                continue;
            }
            let key = contract_key(&route_id, &route.policy);
            let Some(ContractSlot::Learn(slot)) = self.contracts.get(&key) else {
                continue;
            };

            let snapshot = {
                let mut contract = slot
                    .lock()
                    .map_err(|_| GatewayError::Learn("contract state poisoned".to_string()))?;
                contract.finalize(DEFAULT_BODY_MARGIN_BYTES);
                contract.clone()
            };
            storage::save(&config.resolve_path(&policy.contract.path), &snapshot)?;
        }
        Ok(())
    }

    fn request_id(&self) -> String {
        let mut buf = [0u8; 12];
        if rand::rngs::OsRng.try_fill_bytes(&mut buf).is_ok() {
            return hex::encode(buf);
        }
        let value = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{value}")
    }
}

fn contract_key(route_id: &str, policy: &str) -> String {
    format!("{route_id}|{policy}")
}

fn max_policy_timeout(config: &Config) -> Duration {
    config
        .policies
        .values()
        .map(|policy| policy.limits.timeout)
        .max()
        .filter(|timeout| !timeout.is_zero())
        .unwrap_or(DEFAULT_TIMEOUT)
}
