//! Telemetry bridge operator CLI
//!
//! Queries a running bridge for sink delivery state, the latest snapshot
//! and component health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, snapshot, status};

/// Telemetry bridge operator CLI
#[derive(Parser)]
#[command(name = "bridgectl")]
#[command(author, version, about = "Inspect a running telemetry bridge", long_about = None)]
pub struct Cli {
    /// Bridge API URL (can also be set via BRIDGE_API_URL env var)
    #[arg(long, env = "BRIDGE_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-sink delivery state and a snapshot summary
    Status,

    /// Show the fields and position of the latest snapshot
    Snapshot,

    /// Show component health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Snapshot => snapshot::show_snapshot(&client, cli.format).await?,
        Commands::Health => health::show_health(&client, cli.format).await?,
    }

    Ok(())
}
