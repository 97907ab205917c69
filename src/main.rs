use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod auxiliary;
mod config;
mod engine;
mod error;
mod logging;
mod models;
mod priority;
mod probe;
mod process;
mod supervisor;
mod utils;

use crate::config::Cli;
use crate::engine::Monitor;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    utils::setup_console();

    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_file)
        .with_context(|| format!("Failed to open log file {}", cli.log_file.display()))?;

    utils::print_banner();
    info!("pulse-watchdog {}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config().context("Failed to load configuration")?;
    let mut monitor = Monitor::system(config).context("Failed to start monitor")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Stopping watchdog...");
            on_signal.cancel();
        }
    });

    let exit = monitor.run(&cancel).await;
    Ok(ExitCode::from(exit.code()))
}
