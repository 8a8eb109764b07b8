//! CLI entry point for verigate.
//!
//! This binary provides the `verigate` command: schema migration,
//! creating verifications, querying them and feeding worker messages into
//! the in-process bus.

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Migrate => commands::migrate(&config).await,
        Commands::Create {
            subject_id,
            types,
            author,
        } => commands::create(&config, &subject_id, &types, author.as_deref()).await,
        Commands::Get { id } => commands::get(&config, &id).await,
        Commands::List { limit, offset } => commands::list(&config, limit, offset).await,
        Commands::Show { id } => commands::show(&config, &id).await,
        Commands::Ingest => commands::ingest(&config).await,
        Commands::Stats => commands::stats(&config).await,
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured
/// level; output goes to stderr so stdout stays machine-readable.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if log.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
