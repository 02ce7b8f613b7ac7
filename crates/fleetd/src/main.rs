//! fleetd — the fleetgrid daemon.
//!
//! Runs the scheduler control plane: every periodic task over one state
//! store, with the backends configured in `fleetd.toml`.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleetd.toml --data-dir /var/lib/fleetgrid
//! fleetd check-config --config /etc/fleetgrid/fleetd.toml
//! ```

mod config;
mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Run {
        /// Path to fleetd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,
    },
    /// Print the resolved configuration and exit.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => DaemonConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display())),
        None => Ok(DaemonConfig::default()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleetgrid=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, data_dir } => {
            let config = load_config(config.as_ref())?;
            info!(data_dir = ?data_dir, backends = config.backends.len(), "fleetgrid daemon starting");
            daemon::run(config, &data_dir, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
            })
            .await
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
