// ABOUTME: CLI serve command - keep servers warm for a set of roots
//
// Warms every selected server for every root, then loops: on each sweep
// interval logs pool status and evicts temp-directory clients. SIGINT or
// SIGTERM runs the graceful teardown and the report is printed.

use super::{OutputFormat, ServeArgs};
use anyhow::{bail, Context, Result};
use client_pool::{ClientRegistry, PoolConfig, ProcessClientFactory, ServerSpec, ShutdownReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: PoolConfig, format: OutputFormat) -> Result<()> {
    let servers = select_servers(&config, &args.servers)?;
    let roots = args
        .roots
        .iter()
        .map(|root| {
            std::fs::canonicalize(root)
                .with_context(|| format!("Workspace root {} is not accessible", root.display()))
        })
        .collect::<Result<Vec<PathBuf>>>()?;

    let status_every = if config.sweep_interval.is_zero() {
        Duration::from_secs(60)
    } else {
        config.sweep_interval
    };

    let registry = ClientRegistry::new(ProcessClientFactory::new(&config), config);
    registry.shutdown_on_panic();

    for root in &roots {
        for server in &servers {
            registry.warmup_client(root, server);
        }
    }
    info!(roots = roots.len(), servers = servers.len(), "Warming clients");

    let mut shutdown = registry.install_signal_handlers();
    let mut ticker = tokio::time::interval(status_every);
    ticker.tick().await;

    let report = loop {
        tokio::select! {
            joined = &mut shutdown => break joined.context("Shutdown task failed")?,
            _ = ticker.tick() => {
                let evicted = registry.cleanup_temp_directory_clients().await;
                let metrics = registry.metrics().snapshot();
                info!(
                    entries = registry.len(),
                    evicted,
                    spawns = metrics.spawns,
                    startup_failures = metrics.startup_failures,
                    "Pool status"
                );
            }
        }
    };

    print_report(&report, format)
}

/// Resolve the requested server ids, or every configured server
fn select_servers(config: &PoolConfig, ids: &[String]) -> Result<Vec<ServerSpec>> {
    if config.servers.is_empty() {
        bail!(
            "No servers configured. Add [[servers]] entries to {}",
            PoolConfig::default_path().display()
        );
    }

    if ids.is_empty() {
        return Ok(config.servers.clone());
    }

    ids.iter()
        .map(|id| {
            config
                .server(id)
                .cloned()
                .with_context(|| format!("Unknown server '{id}'"))
        })
        .collect()
}

fn print_report(report: &ShutdownReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!("Stopped {} of {} clients", report.stopped, report.total());
            for (key, error) in &report.failed {
                println!("  {key}: {error}");
            }
        }
    }
    Ok(())
}
