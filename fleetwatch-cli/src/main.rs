//! `fleetwatch` -- operator tooling for the fleet log pipeline.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleetwatch_cli::cli::{Cli, Commands};
use fleetwatch_cli::commands;
use fleetwatch_cli::error::CliError;
use fleetwatch_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_deref().unwrap_or("warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Rules(args) => commands::rules::execute(args, &writer).await,
        Commands::Config(args) => commands::config::execute(args, config_path, &writer).await,
        Commands::Ingest(args) => {
            let config = load_config(config_path).await?;
            commands::ingest::execute(args, &config, &writer).await
        }
        Commands::Listen(args) => {
            let config = load_config(config_path).await?;
            commands::listen::execute(args, &config, &writer).await
        }
    }
}

async fn load_config(
    path: Option<&std::path::Path>,
) -> Result<fleetwatch_core::config::FleetwatchConfig, CliError> {
    commands::config::load_effective(path)
        .await
        .map_err(|e| CliError::Config(e.to_string()))
}
