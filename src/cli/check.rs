// ABOUTME: CLI check command - start one server for a root and report on it
//
// Acquires a client through the pool (spawn + initialize handshake), prints
// how long that took, then releases it and stops the pool.

use super::{CheckArgs, OutputFormat};
use anyhow::{anyhow, Context, Result};
use client_pool::{ClientRegistry, PoolConfig, ProcessClientFactory};
use serde::Serialize;
use std::time::Instant;

/// Result of a check run
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub server: String,
    pub root: String,
    pub pid: Option<u32>,
    pub ready_ms: u128,
}

/// Execute the check command
pub async fn execute(args: CheckArgs, config: PoolConfig, format: OutputFormat) -> Result<()> {
    let server = config
        .server(&args.server)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown server '{}'. Run 'client-pool servers' to list them.", args.server))?;

    let root = std::fs::canonicalize(&args.root)
        .with_context(|| format!("Workspace root {} is not accessible", args.root.display()))?;

    let registry = ClientRegistry::new(ProcessClientFactory::new(&config), config);

    let started = Instant::now();
    let result = registry.get_client(&root, &server).await;
    let ready_ms = started.elapsed().as_millis();

    let report = match result {
        Ok(client) => {
            let report = CheckReport {
                server: server.id.clone(),
                root: root.display().to_string(),
                pid: client.pid().await,
                ready_ms,
            };
            registry.release_client(&root, &server.id);
            report
        }
        Err(e) => {
            registry.stop_all().await;
            return Err(e).with_context(|| format!("Server '{}' failed to start", server.id));
        }
    };

    registry.stop_all().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Server '{}' ready in {}ms", report.server, report.ready_ms);
            println!("  root: {}", report.root);
            if let Some(pid) = report.pid {
                println!("  pid:  {pid}");
            }
        }
    }

    Ok(())
}
