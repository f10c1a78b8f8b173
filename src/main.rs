use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::Router;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wardgate::cli::{Cli, Commands};
use wardgate::config::{self, Config, Mode};
use wardgate::error::GatewayError;
use wardgate::gateway::Gateway;
use wardgate::logging::DecisionLogger;
use wardgate::report::{self, ReportFormat};
use wardgate::observability;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<GatewayError>() {
            Some(GatewayError::Validation(problems)) => {
                for problem in problems {
                    eprintln!("{problem}");
                }
            }
            _ => eprintln!("{err:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { config } => {
            let cfg = Config::load(&config)?;
            cfg.validate()?;
            println!("config ok");
            Ok(())
        }
        Commands::Run {
            config,
            mode,
            contract,
        } => {
            let mut cfg = Config::load(&config)?;
            cfg.apply_overrides(mode, contract.as_deref());
            cfg.validate()?;
            serve(cfg, None).await
        }
        Commands::Learn {
            config,
            duration,
            out,
        } => {
            if duration.is_zero() {
                anyhow::bail!("duration must be > 0");
            }
            let mut cfg = Config::load(&config)?;
            cfg.apply_overrides(Some(Mode::Learn), out.as_deref());
            cfg.validate()?;
            serve(cfg, Some(duration)).await
        }
        Commands::Enforce { config, contract } => {
            let mut cfg = Config::load(&config)?;
            cfg.apply_overrides(Some(Mode::Enforce), contract.as_deref());
            cfg.validate()?;
            serve(cfg, None).await
        }
        Commands::Report {
            input,
            since,
            format,
            out,
        } => report_command(&input, since, format, out.as_deref()),
        Commands::Version => {
            println!(
                "version={} commit={} buildDate={}",
                env!("CARGO_PKG_VERSION"),
                option_env!("WARDGATE_COMMIT").unwrap_or("none"),
                option_env!("WARDGATE_BUILD_DATE").unwrap_or("unknown"),
            );
            Ok(())
        }
    }
}

async fn serve(cfg: Config, learn_for: Option<Duration>) -> anyhow::Result<()> {
    init_tracing(&cfg.logging.level, &cfg.logging.format);

    let mut gateway = Gateway::from_config(&cfg)?;
    if !cfg.logging.decision_log.is_empty() {
        let path = cfg.resolve_path(&cfg.logging.decision_log);
        gateway = gateway.with_decision_logger(DecisionLogger::open(&path)?);
    }
    if cfg.metrics.enabled {
        let addr = config::parse_listen_addr(&cfg.metrics.listen)?;
        observability::init_metrics(addr)?;
        gateway = gateway.with_metrics();
    }
    let gateway = Arc::new(gateway);

    let app = Router::new()
        .fallback(gateway_entry)
        .with_state(gateway.clone());
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let addr = config::parse_listen_addr(&cfg.server.listen)?;
    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_watcher(handle.clone(), learn_for));

    tracing::info!(
        listen = %addr,
        routes = cfg.routes.len(),
        policies = cfg.policies.len(),
        "gateway listening"
    );

    if cfg.server.tls.enabled {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cfg.resolve_path(&cfg.server.tls.cert_file),
            cfg.resolve_path(&cfg.server.tls.key_file),
        )
        .await?;
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(make_service)
            .await?;
    } else {
        axum_server::bind(addr).handle(handle).serve(make_service).await?;
    }

    tracing::info!("shutdown complete");

    if learn_for.is_some() {
        gateway.save_contracts(&cfg)?;
        ensure_min_samples(&cfg, &gateway)?;
    }

    Ok(())
}

async fn gateway_entry(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    gateway.handle(req, client_addr).await
}

/// Trigger a 5-second graceful drain on SIGINT/SIGTERM, or when the learn
/// window elapses.
async fn shutdown_watcher(handle: axum_server::Handle, learn_for: Option<Duration>) {
    let signals = async {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    };

    match learn_for {
        Some(window) => {
            tokio::select! {
                _ = signals => {}
                _ = tokio::time::sleep(window) => {
                    tracing::info!("learn window elapsed");
                }
            }
        }
        None => signals.await,
    }

    tracing::info!("shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(5)));
}

/// Every learn-mode route must have met its configured sample floor.
fn ensure_min_samples(cfg: &Config, gateway: &Gateway) -> anyhow::Result<()> {
    for (i, route) in cfg.routes.iter().enumerate() {
        let route_id = format!("route-{i}");
        let Some(policy) = cfg.policies.get(&route.policy) else {
            continue;
        };
        if policy.mode != Mode::Learn {
            continue;
        }
        let Some(contract) = gateway.contract_snapshot(&route_id, &route.policy) else {
            anyhow::bail!("missing contract for {}", route.policy);
        };
        if policy.contract.min_samples > 0 && contract.samples < policy.contract.min_samples {
            anyhow::bail!(
                "contract for {} has {} samples, need {}",
                route.policy,
                contract.samples,
                policy.contract.min_samples
            );
        }
    }
    Ok(())
}

fn report_command(
    input: &Path,
    since: Option<Duration>,
    format: ReportFormat,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let since = since.map(|d| {
        chrono::Utc::now() - chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
    });
    let decisions = report::read_decisions(input, since)?;
    let summary = report::summarize(&decisions);

    let content = match format {
        ReportFormat::Text => report::render_text(&summary).into_bytes(),
        ReportFormat::Md => report::render_markdown(&summary).into_bytes(),
        ReportFormat::Json => report::render_json(&summary)?,
    };
    report::write_output(out, &content)?;
    Ok(())
}

fn init_tracing(level: &str, format: &str) {
    let default = if level.is_empty() {
        "wardgate=info".to_string()
    } else {
        level.to_string()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
