//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives a `VisualTimeoutManager` with them, and writes `ResponseEnvelope`
//! and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use visual_timeout::host::stdio::run_stdio_bridge;
use visual_timeout::{LifespanTimeouts, TimeoutConfig, VisualTimeoutManager};

/// Visual timeout host bridge.
#[derive(Parser)]
#[command(name = "visual-timeout-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    ///
    /// Defaults to `~/.config/visual-timeout/config.toml` when it exists.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout is reserved for the JSON protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("visual_timeout=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => TimeoutConfig::from_file(&path)?,
        None => {
            let path = TimeoutConfig::default_config_path();
            if path.exists() {
                TimeoutConfig::from_file(&path)?
            } else {
                TimeoutConfig::default()
            }
        }
    };

    tracing::info!(backend = ?config.timer.backend, "visual-timeout-host starting");

    let manager = Arc::new(VisualTimeoutManager::from_config(&config)?);
    let timeouts = LifespanTimeouts::from_config(&config.presentation);

    run_stdio_bridge(Arc::clone(&manager), timeouts)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "visual-timeout-host exited with error");
            anyhow::anyhow!("visual-timeout-host failed: {e}")
        })?;

    manager.shutdown();
    tracing::info!("visual-timeout-host shut down cleanly");
    Ok(())
}
