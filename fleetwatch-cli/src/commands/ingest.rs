//! `fleetwatch ingest` command handler

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetwatch_core::bus::{MessageBus, NatsBus};
use fleetwatch_core::config::FleetwatchConfig;
use fleetwatch_core::error::FleetwatchError;
use fleetwatch_detection::{FileCollector, LogParser, year_for_file};

use crate::cli::IngestArgs;
use crate::error::CliError;
use crate::forward::{EventForwarder, IngestSummary};
use crate::output::OutputWriter;

/// Lines buffered between the file reader and the forwarder.
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Execute the `ingest` command.
pub async fn execute(
    args: IngestArgs,
    config: &FleetwatchConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let bus: Option<Arc<dyn MessageBus>> = if args.dry_run {
        None
    } else {
        let bus = NatsBus::connect(&config.bus)
            .await
            .map_err(FleetwatchError::from)?;
        Some(Arc::new(bus))
    };

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping replay");
                cancel.cancel();
            }
        }
    });

    let parser = LogParser::from_config(&config.parser);
    let result = ingest_file(&args.file, args.year, parser, bus.clone(), cancel).await;
    interrupt.abort();

    if let Some(bus) = &bus {
        if let Err(e) = bus.close().await {
            warn!(error = %e, "failed to flush bus connection");
        }
    }

    let summary = result?;
    writer.render(&summary)?;

    if summary.parsed > 0 && summary.published == 0 && !summary.dry_run {
        return Err(CliError::Command(format!(
            "none of {} parsed events could be published",
            summary.parsed
        )));
    }
    Ok(())
}

/// Replay `path` through the parser and, when a bus is given, publish each event.
///
/// `year` overrides the year inferred from the file name.
pub async fn ingest_file(
    path: &Path,
    year: Option<i32>,
    parser: LogParser,
    bus: Option<Arc<dyn MessageBus>>,
    cancel: CancellationToken,
) -> Result<IngestSummary, CliError> {
    let year = year.unwrap_or_else(|| year_for_file(path));
    let dry_run = bus.is_none();
    info!(path = %path.display(), year, dry_run, "replaying log file");

    let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let mut collector = FileCollector::new(path, tx);
    let reader = tokio::spawn(async move { collector.run(cancel).await });

    let mut forwarder = EventForwarder::new(parser, bus, &path.display().to_string());
    while let Some(raw) = rx.recv().await {
        forwarder.forward(&raw, year).await;
    }

    reader
        .await
        .map_err(|e| CliError::Command(format!("file reader task failed: {e}")))??;

    let mut summary = forwarder.into_summary();
    summary.year = Some(year);
    info!(
        path = %path.display(),
        lines_read = summary.lines_read,
        parsed = summary.parsed,
        parse_failures = summary.parse_failures,
        published = summary.published,
        publish_failures = summary.publish_failures,
        "replay finished"
    );
    Ok(summary)
}
