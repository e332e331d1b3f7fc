//! gatekeeperd - Unix-socket consensus daemon.
//!
//! The machine asking for an operation is just one voice; approval
//! comes from a quorum of the owner's other devices.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::UnixListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::GatekeeperConfig;
use gatekeeperd::Daemon;

#[derive(Parser)]
#[command(name = "gatekeeperd")]
#[command(about = "Multi-device consensus daemon gating sensitive operations")]
struct Cli {
    /// Unix socket to listen on
    #[arg(short, long, env = "GATEKEEPER_SOCKET", default_value = "/tmp/gatekeeperd.sock")]
    socket: PathBuf,

    /// Path to YAML configuration file
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Node ID (overrides config file)
    #[arg(long, env = "GATEKEEPER_NODE_ID")]
    node_id: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gatekeeperd={},gatekeeper={},info", cli.log_level, cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)?;
            GatekeeperConfig::from_yaml(&yaml)?
        }
        None => GatekeeperConfig::default(),
    };
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }

    info!("======================================");
    info!("  gatekeeperd - consensus daemon");
    info!("  This machine is one vote of N");
    info!("======================================");
    info!("Node ID: {}", config.node_id);
    info!("Socket: {}", cli.socket.display());
    info!("Approval threshold: {}", config.gate.approval_threshold);
    info!("Vote timeout: {}ms", config.gate.vote_timeout_ms);
    info!("Stale window: {}s", config.registry.stale_window_secs);
    info!("======================================");

    // Remove a stale socket from a previous run.
    if cli.socket.exists() {
        std::fs::remove_file(&cli.socket)?;
    }

    let listener = UnixListener::bind(&cli.socket)?;
    info!("Listening on {}", cli.socket.display());

    let daemon = Arc::new(Daemon::new(config));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(Arc::clone(&daemon).handle_connection(stream));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let stats = daemon.gate().stats().await;
    info!(
        total_decisions = stats.total_decisions,
        auto_approved = stats.auto_approved,
        approved = stats.approved,
        denied = stats.denied,
        timed_out = stats.timed_out,
        late_votes = stats.late_votes,
        "Session statistics"
    );

    if let Err(e) = std::fs::remove_file(&cli.socket) {
        warn!(error = %e, "Failed to remove socket file");
    }

    Ok(())
}
