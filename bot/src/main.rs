use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ts3_pokebot::bot;
use ts3_pokebot::config::{BotConfig, DiscoveryMode};

#[derive(Parser)]
#[command(version, about = "Pokes members of a TeamSpeak 3 server group once")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "ts3bot.toml")]
    config: PathBuf,

    /// Override the configured discovery mode.
    #[arg(long, value_enum)]
    mode: Option<DiscoveryMode>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration (TOML file + env overrides)
    let mut config = match BotConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(severity = "critical", error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(mode) = cli.mode {
        config.notifier.mode = mode;
    }
    if let Err(e) = config.validate() {
        error!(severity = "critical", error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping gracefully...");
        shutdown_cancel.cancel();
    });

    info!(mode = ?config.notifier.mode, "Worker started");

    match bot::run(config, cancel).await {
        Ok(()) => {
            info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
