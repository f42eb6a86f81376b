use anyhow::Result;
use clap::Parser;
use tracing::Instrument;

use fleetwatch_core::config::FleetwatchConfig;
use fleetwatch_daemon::cli::DaemonCli;
use fleetwatch_daemon::daemon::{Daemon, Role};
use fleetwatch_daemon::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = FleetwatchConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI overrides beat both the file and FLEETWATCH_* variables
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    let role = Role::resolve(&cli.role, &config)?;

    if cli.validate {
        println!("configuration OK: {} ({})", cli.config.display(), role);
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        role = %role,
        version = env!("CARGO_PKG_VERSION"),
        "fleetwatch-daemon starting"
    );

    let span = tracing::info_span!("fleetwatch", role = %role);
    async {
        let mut daemon = Daemon::connect(config, role).await?;
        daemon.run().await
    }
    .instrument(span)
    .await?;

    tracing::info!("fleetwatch-daemon shut down");
    Ok(())
}
