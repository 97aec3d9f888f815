mod auth;
mod cli;
mod config;
mod daemon;
mod db;
mod error;
mod fsm;
mod jobqueue;
mod ledger;
mod models;
mod plan;
mod poller;
mod reminder_dispatcher;
mod reminders;
mod render;
mod router;
mod senders;
mod server;
mod store;
mod telegram_client;
mod telegram_types;
mod ticker;
mod time_zone;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.daylog.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}
