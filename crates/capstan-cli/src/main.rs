//! capstan CLI
//!
//! Deploys a packaged web application to one managed host over SSH:
//! uploads the build archive and deploy script, runs the script with
//! streamed output, and verifies the result. Also provides read-only
//! path probing and config inspection.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capstan::commands;
use capstan_core::config::{self, AuthMethod};

#[derive(Parser)]
#[command(name = "capstan")]
#[command(author, version, about = "Remote deployment orchestrator for one managed host")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment pipeline against the configured target
    Deploy {
        /// Target host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Remote user (overrides config)
        #[arg(long)]
        user: Option<String>,

        /// Private key path (overrides the configured auth method)
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Upload artifacts but skip remote execution
        #[arg(long)]
        upload_only: bool,
    },

    /// Probe which candidate deployment roots exist on the target
    Probe {
        /// Candidate paths (defaults to the configured candidate roots)
        paths: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the default config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Operator interrupt cancels the pipeline; cleanup still runs
    // before the process ends.
    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, cancelling run...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, cancelling run...");
            }
        }

        cancel_signal.cancel();
    });

    match cli.command {
        Commands::Deploy {
            host,
            user,
            key,
            upload_only,
        } => {
            let mut config = commands::load_deploy_config(cli.config.as_ref())?;
            if let Some(host) = host {
                config.target.host = host;
            }
            if let Some(user) = user {
                config.target.user = user;
            }
            if let Some(key_path) = key {
                config.target.auth = AuthMethod::PrivateKey { key_path };
            }

            let exit_code = commands::deploy_command(&config, upload_only, cancel).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }

        Commands::Probe { paths } => {
            let config = commands::load_deploy_config(cli.config.as_ref())?;
            commands::probe_command(&config, paths).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                commands::config_show(cli.config.as_ref())?;
            }
            ConfigAction::Path => {
                println!("{}", config::default_config_path().display());
            }
        },
    }

    Ok(())
}
