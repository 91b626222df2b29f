use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eeg_daemon::app::{self, RunMode, RunOptions, RunOutcome};
use eeg_daemon::config::{load_config, DEFAULT_CONFIG_PATH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ADS1299 acquisition daemon
#[derive(Parser, Debug)]
#[command(name = "eeg_daemon", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated ADS1299 instead of the board
    #[arg(long)]
    simulate: bool,

    #[arg(long, value_enum, default_value_t = RunMode::Stream)]
    mode: RunMode,

    /// Stream the internal test signal instead of EEG
    #[arg(long)]
    test_signal: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eeg_daemon=info,pipeline=info,sensors=info,boards=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("EEG daemon starting...");

    let config = load_config(&args.config)?;
    let options = RunOptions {
        mode: args.mode,
        simulate: args.simulate,
        test_signal: args.test_signal,
        duration: args.duration.map(Duration::from_secs),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                flag.store(true, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let outcome = tokio::task::spawn_blocking(move || app::run(config, options, &shutdown))
        .await
        .context("acquisition task panicked")??;

    match outcome {
        RunOutcome::Streamed(stats) => {
            tracing::info!("Stream finished: {}", serde_json::to_string(&stats)?);
        }
        RunOutcome::Captured(report) => {
            tracing::info!(
                "Capture finished: {} chunks, {} frames persisted, {} dropped",
                report.chunks_written,
                report.frames_persisted,
                report.frames_dropped
            );
        }
    }
    Ok(())
}
