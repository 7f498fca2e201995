//! flow-triage CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use flow_triage::cli::{commands, handle_error, Cli, Commands};
use flow_triage::infrastructure::config::ConfigLoader;
use flow_triage::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _logger = LoggerImpl::init(&LogConfig::try_from(&config.logging)?)?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Flows(args) => commands::flows::execute(args, &config, cli.json).await,
        Commands::Hospital(args) => commands::hospital::execute(args, &config, cli.json).await,
    }
}
