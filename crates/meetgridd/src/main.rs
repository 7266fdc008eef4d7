//! meetgridd — the meetgrid daemon.
//!
//! One binary, two roles:
//! - `coordinator`: worker registry, health checker, assignment
//!   coordinator, and the RPC + operator API server
//! - `controller`: a meeting controller that registers with a
//!   coordinator, heartbeats, and accepts meeting offers
//!
//! # Usage
//!
//! ```text
//! meetgridd coordinator --id gc-1 --region us-east --zone us-east-1a
//! meetgridd controller --id mc-1 --region us-east --zone us-east-1b --coordinator 10.0.0.5:8080
//! meetgridd --config /etc/meetgrid/meetgrid.toml --log-format json coordinator
//! ```

mod config;
mod controller_mode;
mod coordinator_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{
    ControllerArgs, ControllerSettings, CoordinatorArgs, CoordinatorSettings, FileConfig,
};

#[derive(Parser)]
#[command(name = "meetgridd", about = "meetgrid meeting assignment daemon")]
struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a coordinator.
    Coordinator(CoordinatorArgs),
    /// Run a meeting controller.
    Controller(ControllerArgs),
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,meetgridd=debug,meetgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolve once Ctrl-C arrives. A failed handler install never resolves,
/// so the daemon keeps running instead of shutting down at once.
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `root` on Ctrl-C.
fn cancel_on_ctrl_c(root: CancellationToken) {
    tokio::spawn(async move {
        ctrl_c().await;
        root.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let file = FileConfig::load(cli.config.as_deref())?;
    let secret = file.master_secret()?;

    match cli.command {
        Command::Coordinator(args) => {
            let settings = CoordinatorSettings::resolve(args, file.coordinator)?;
            coordinator_mode::run_coordinator(settings, secret).await
        }
        Command::Controller(args) => {
            let settings = ControllerSettings::resolve(args, file.controller)?;
            controller_mode::run_controller(settings, secret).await
        }
    }
}
