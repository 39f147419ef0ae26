//! Bridge Warden
//!
//! Relays bridge events between a source and a destination EVM chain.
//!
//! # Usage
//!
//! ```text
//! warden scan source            # one pass: Deposit on source -> wrap on destination
//! warden scan destination       # one pass: Unwrap on destination -> withdraw on source
//! warden watch --interval-secs 30
//! ```
//!
//! Configuration comes from the environment (and `.env`), see `config.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing::{info, warn};

use warden::config::Config;
use warden::metrics;
use warden::registry::ChainRegistry;
use warden::types::ChainRole;
use warden::Warden;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Bridge warden relay")]
struct Cli {
    /// Contract registry file, overrides CONTRACT_INFO_PATH
    #[arg(long, global = true)]
    contracts: Option<PathBuf>,

    /// Write the Prometheus text exposition here when the run ends
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single relay pass
    Scan {
        /// Watched chain: "source" or "destination"
        direction: ChainRole,
    },
    /// Run source and destination passes until interrupted
    Watch {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> eyre::Result<()> {
    init_logging();

    info!("Starting bridge warden");

    let mut config = Config::load()?;
    if let Some(path) = cli.contracts.clone() {
        config.warden.contract_info_path = path;
    }
    info!(
        source_rpc = %warden::redact::redact_url(&config.source.rpc_url),
        destination_rpc = %warden::redact::redact_url(&config.destination.rpc_url),
        contracts = %config.warden.contract_info_path.display(),
        "Configuration loaded"
    );

    let registry = ChainRegistry::load(&config.warden.contract_info_path)?;
    let mut warden = Warden::from_config(&config, registry)?;

    let result = match cli.command {
        Command::Scan { direction } => warden.scan_role(direction).await.map(|summary| {
            info!(
                direction = %summary.direction,
                events_found = summary.events_found,
                relayed = summary.relayed,
                failed = summary.failed,
                already_relayed = summary.already_relayed,
                "Scan finished"
            );
        }),
        Command::Watch { interval_secs } => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                let _ = shutdown_tx.send(()).await;
            });

            warden
                .watch(Duration::from_secs(interval_secs), shutdown_rx)
                .await
        }
    };

    if let Some(path) = &cli.metrics_file {
        write_metrics(path)?;
    }

    result?;
    info!("Bridge warden stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,warden=debug"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer().with_target(true)))
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .init();
}

fn write_metrics(path: &Path) -> eyre::Result<()> {
    let text = metrics::render().wrap_err("Failed to render metrics")?;
    std::fs::write(path, text)
        .wrap_err_with(|| format!("Failed to write metrics to {}", path.display()))?;
    info!(path = %path.display(), "Metrics written");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
