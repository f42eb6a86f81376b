//! `fleetwatch listen` command handler
//!
//! Receives BSD syslog over UDP and publishes each line until Ctrl-C.
//! Datagrams carry no year, so the year of the arrival time is used.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetwatch_core::bus::{MessageBus, NatsBus};
use fleetwatch_core::config::FleetwatchConfig;
use fleetwatch_core::error::FleetwatchError;
use fleetwatch_detection::{LogParser, RawLine, SyslogUdpCollector, SyslogUdpConfig};

use crate::cli::ListenArgs;
use crate::error::CliError;
use crate::forward::{EventForwarder, IngestSummary};
use crate::output::OutputWriter;

const LINE_CHANNEL_CAPACITY: usize = 4096;

/// Execute the `listen` command.
pub async fn execute(
    args: ListenArgs,
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

    let parser = LogParser::from_config(&config.parser);
    let listener = match SyslogListener::bind(&args.bind, parser, bus.clone()).await {
        Ok(listener) => listener,
        Err(e) => {
            close_bus(bus.as_deref()).await;
            return Err(e);
        }
    };

    let interval = Duration::from_secs(args.summary_interval.max(1));
    let result = listener
        .run_until(
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl-C, stopping");
                }
            },
            interval,
        )
        .await;

    close_bus(bus.as_deref()).await;

    let summary = result?;
    writer.render(&summary)?;
    Ok(())
}

async fn close_bus(bus: Option<&dyn MessageBus>) {
    if let Some(bus) = bus {
        if let Err(e) = bus.close().await {
            warn!(error = %e, "failed to flush bus connection");
        }
    }
}

/// A bound UDP syslog receiver.
pub struct SyslogListener {
    collector: SyslogUdpCollector,
    socket: UdpSocket,
    rx: mpsc::Receiver<RawLine>,
    forwarder: EventForwarder,
}

impl SyslogListener {
    /// Bind the UDP socket. Fails fast when the address is unusable.
    pub async fn bind(
        bind_addr: &str,
        parser: LogParser,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Result<Self, CliError> {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut collector = SyslogUdpCollector::new(
            SyslogUdpConfig {
                bind_addr: bind_addr.to_owned(),
                ..SyslogUdpConfig::default()
            },
            tx,
        );
        let socket = collector.bind().await?;
        let forwarder = EventForwarder::new(parser, bus, &format!("udp://{bind_addr}"));
        Ok(Self {
            collector,
            socket,
            rx,
            forwarder,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.collector.local_addr()
    }

    /// Receive and forward until `shutdown` resolves, logging progress every `summary_interval`.
    pub async fn run_until<F>(
        self,
        shutdown: F,
        summary_interval: Duration,
    ) -> Result<IngestSummary, CliError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut collector,
            socket,
            mut rx,
            mut forwarder,
        } = self;

        let cancel = CancellationToken::new();
        let receiver = tokio::spawn({
            let cancel = cancel.clone();
            async move { collector.run_on(socket, cancel).await }
        });

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + summary_interval,
            summary_interval,
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping listener");
                    break;
                }
                raw = rx.recv() => match raw {
                    Some(raw) => {
                        let year = raw.received_at.year();
                        forwarder.forward(&raw, year).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => log_progress(forwarder.summary()),
            }
        }

        cancel.cancel();
        // Drain what arrived before the receiver observed the cancellation
        while let Some(raw) = rx.recv().await {
            let year = raw.received_at.year();
            forwarder.forward(&raw, year).await;
        }
        receiver
            .await
            .map_err(|e| CliError::Command(format!("syslog receiver task failed: {e}")))??;

        let summary = forwarder.into_summary();
        log_progress(&summary);
        Ok(summary)
    }
}

fn log_progress(summary: &IngestSummary) {
    info!(
        source = %summary.source,
        lines_read = summary.lines_read,
        parsed = summary.parsed,
        parse_failures = summary.parse_failures,
        published = summary.published,
        publish_failures = summary.publish_failures,
        "syslog listener progress"
    );
}
