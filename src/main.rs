// ABOUTME: Main entry point for client-pool CLI
//
// Binary: client-pool
// Usage: client-pool [--config FILE] [--format text|json] <COMMAND>
// - servers: list configured servers
// - check: start one server for a root and report
// - serve: keep servers warm until SIGINT/SIGTERM

#![allow(missing_docs)]

use anyhow::{Context, Result};
use clap::Parser;
use client_pool::PoolConfig;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    setup_panic_handler();

    let args = cli::Cli::parse();
    let config = PoolConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        cli::Commands::Servers => cli::servers::execute(&config, args.format),
        cli::Commands::Check(check_args) => cli::check::execute(check_args, config, args.format).await,
        cli::Commands::Serve(serve_args) => cli::serve::execute(serve_args, config, args.format).await,
    }
}

fn setup_logging() {
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use tracing_subscriber::prelude::*;

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "client_pool=info".into())
    };

    let log_dir = dirs::home_dir()
        .map(|home| home.join(".client-pool").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".client-pool/logs"));

    let _ = std::fs::create_dir_all(&log_dir);

    // JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "client-pool-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(file)
                    .with_ansi(false),
            )
            .with(filter())
            .init(),
        Err(_) => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter())
            .init(),
    }
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
