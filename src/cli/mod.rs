// ABOUTME: CLI argument parsing and command routing for client-pool
//
// Provides command-line interface for:
// - Listing configured servers (servers)
// - One-shot acquire/release of a server for a root (check)
// - Keeping warm clients for a set of roots until signalled (serve)

pub mod check;
pub mod serve;
pub mod servers;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Pool of long-lived server processes keyed by workspace root
#[derive(Parser)]
#[command(name = "client-pool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.client-pool/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    Servers,

    /// Start a server for a root, report on it, then shut it down
    Check(CheckArgs),

    /// Keep servers warm for the given roots until SIGINT/SIGTERM
    Serve(ServeArgs),
}

/// Arguments for the check command
#[derive(clap::Args)]
pub struct CheckArgs {
    /// Workspace root the server runs in
    #[arg(long)]
    pub root: PathBuf,

    /// Configured server id
    #[arg(long)]
    pub server: String,
}

/// Arguments for the serve command
#[derive(clap::Args)]
pub struct ServeArgs {
    /// Workspace roots to warm servers for
    #[arg(long = "root", required = true)]
    pub roots: Vec<PathBuf>,

    /// Only warm these server ids (default: all configured)
    #[arg(long = "server")]
    pub servers: Vec<String>,
}
