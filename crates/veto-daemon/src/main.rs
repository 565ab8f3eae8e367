//! Veto daemon
//!
//! Runs the safety coordinator's periodic monitor and a console operator
//! that answers approval requests on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veto_coordinator::{AuditBackend, SafetyConfig, SafetyCoordinator};

mod operator;

/// Veto daemon CLI
#[derive(Parser)]
#[command(name = "vetod")]
#[command(about = "Veto - safety governance daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VETO_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "VETO_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VETO_LOG_JSON")]
    json: bool,

    /// Append audit records to this JSONL file
    #[arg(long, env = "VETO_AUDIT_PATH")]
    audit_path: Option<PathBuf>,

    /// Seconds between monitoring cycles
    #[arg(long, env = "VETO_TICK_SECS")]
    tick_secs: Option<u64>,

    /// Reviewer name recorded on console decisions
    #[arg(long, env = "VETO_OPERATOR", default_value = "operator")]
    operator: String,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        SafetyConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // CLI flags win over file and environment.
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(path) = cli.audit_path {
        config.audit = AuditBackend::Jsonl { path };
    }
    if let Some(secs) = cli.tick_secs {
        config.coordinator.tick_interval_secs = secs;
    }
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging.level, config.logging.json);

    let coordinator = Arc::new(
        SafetyCoordinator::new(config).context("failed to build safety coordinator")?,
    );
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tick_secs = coordinator.settings().tick_interval_secs,
        "veto daemon starting"
    );
    let monitor = coordinator.clone().start();

    println!("{}", operator::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("stdin closed; monitor keeps running until Ctrl+C");
                    (&mut shutdown).await;
                    break;
                };
                match operator::parse(&line) {
                    Ok(Some(command)) => {
                        match operator::execute(&coordinator, &cli.operator, command).await {
                            Ok(out) if out.is_empty() => {}
                            Ok(out) => println!("{out}"),
                            Err(e) => println!("error: {e:#}"),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("error: {e}"),
                }
            }
        }
    }

    tracing::info!("veto daemon shutting down");
    coordinator.shutdown();
    if let Err(e) = monitor.await {
        tracing::error!(error = %e, "monitor task ended abnormally");
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
