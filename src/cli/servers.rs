// ABOUTME: CLI servers command - list the servers the pool can spawn

use super::OutputFormat;
use anyhow::Result;
use client_pool::{PoolConfig, ServerSpec};

/// Execute the servers command
pub fn execute(config: &PoolConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config.servers)?),
        OutputFormat::Text => output_text(&config.servers),
    }
    Ok(())
}

fn output_text(servers: &[ServerSpec]) {
    if servers.is_empty() {
        println!("No servers configured.");
        println!("Add [[servers]] entries to {}", PoolConfig::default_path().display());
        return;
    }

    println!("{:<24} COMMAND", "ID");
    for server in servers {
        println!("{:<24} {}", server.id, command_line(server));
    }
}

fn command_line(server: &ServerSpec) -> String {
    std::iter::once(server.command.as_str())
        .chain(server.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
