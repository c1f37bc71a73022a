//! Engram MCP Server binary
//!
//! Bootstrap order is explicit and strict: environment secrets, then
//! configuration, then the pool, then the API clients, then services and
//! periodic jobs, then the stdio transport. Nothing is constructed at module
//! load.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use engram_core::{
    EmbeddingClient, EngramConfig, JudgeClient, RetryPolicy, Secrets, Store,
};
use engram_mcp::protocol::stdio::StdioTransport;
use engram_mcp::server::McpServer;
use engram_mcp::state::Services;

/// Interval between budget checks; alerts themselves dedup per day.
const BUDGET_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

struct CliArgs {
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

/// Hand-parsed flags; exits on --help/--version or bad usage.
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = CliArgs {
        data_dir: None,
        config_path: None,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Engram MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Cognitive memory engine over the Model Context Protocol.");
                println!();
                println!("USAGE:");
                println!("    engram-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Database directory override");
                println!("    --config <PATH>         TOML configuration file");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (debug, info, warn, error)");
                println!("    EMBEDDINGS_API_KEY      Embeddings API key (required)");
                println!("    JUDGE_API_KEY           Judge API key (required)");
                println!("    ENGRAM_DB_PATH          Database file override");
                println!("    ENGRAM_*                Config overlay, e.g. ENGRAM_BUDGET_MONTHLY_LIMIT_EUR");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("engram-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                parsed.data_dir = Some(PathBuf::from(&args[i]));
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                }
                parsed.config_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'engram-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn resolve_db_path(args: &CliArgs, secrets: &Secrets, config: &EngramConfig) -> Option<PathBuf> {
    if let Some(dir) = &args.data_dir {
        return Some(dir.join("engram.db"));
    }
    secrets
        .db_path
        .clone()
        .or_else(|| config.database.path.clone())
}

fn bootstrap(args: CliArgs) -> anyhow::Result<(Arc<Services>, Store)> {
    // Secrets first: nothing below may construct a client without them.
    let secrets = Secrets::from_env();
    let config = EngramConfig::load(args.config_path.as_deref()).context("loading configuration")?;

    let db_path = resolve_db_path(&args, &secrets, &config);
    let store = Store::open(db_path).context("opening storage")?;
    info!("Storage initialized");

    let policy = RetryPolicy::from_config(&config.retry);
    let embeddings_key = secrets
        .embeddings_api_key
        .context("EMBEDDINGS_API_KEY must be set")?;
    let judge_key = secrets.judge_api_key.context("JUDGE_API_KEY must be set")?;

    let embedder = Arc::new(
        EmbeddingClient::new(&config.embeddings, policy.clone(), embeddings_key, store.clone())
            .context("constructing embeddings client")?,
    );
    let judge = Arc::new(
        JudgeClient::new(&config.evaluation, policy, judge_key, store.clone())
            .context("constructing judge client")?,
    );

    let services = Services::assemble(config, store.clone(), embedder, judge)
        .context("assembling services")?;
    Ok((services, store))
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    // Logging to stderr only; stdout carries JSON-RPC frames.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Engram MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let (services, store) = match bootstrap(args) {
        Ok(built) => built,
        Err(e) => {
            error!("Bootstrap failed: {e:#}");
            std::process::exit(1);
        }
    };

    // Periodic judge health check: pings only while fallback is active.
    {
        let fallback = services.fallback.clone();
        let judge = services.judge.clone();
        let interval =
            Duration::from_secs(services.config.fallback.healthcheck_interval_seconds.max(1));
        tokio::spawn(fallback.run_health_loop(judge, interval));
    }

    // Periodic budget check with per-day alert dedup.
    {
        let budget = services.budget.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BUDGET_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match budget.send_alerts(Utc::now()) {
                    Ok(Some(alert_type)) => {
                        info!(alert_type, "Budget alert recorded");
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Budget check failed: {}", e),
                }
            }
        });
    }

    // Graceful drain on SIGINT/SIGTERM.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received; draining");
        let _ = shutdown_tx.send(true);
    });

    let server = McpServer::new(services);
    let transport = StdioTransport::new(shutdown_rx);

    info!("Serving MCP over stdio");
    if let Err(e) = transport.run(server).await {
        error!("Transport error: {}", e);
        store.close();
        std::process::exit(1);
    }

    store.close();
    info!("Engram MCP Server stopped");
}
