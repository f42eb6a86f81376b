//! Raw line -> parsed event -> `logs.<domain>` forwarding
//!
//! Shared by `ingest` (file replay) and `listen` (UDP syslog). Each line is
//! parsed and classified once; failures are counted and never stop the stream.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;

use fleetwatch_core::bus::subject::logs_subject;
use fleetwatch_core::bus::{MessageBus, publish_json};
use fleetwatch_core::metrics as m;
use fleetwatch_detection::{LogParser, RawLine};

use crate::output::Render;

/// Parse failures kept in the summary for display.
const MAX_FAILURE_SAMPLES: usize = 10;

/// Per-run ingestion counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    /// Input description (file path or bind address).
    pub source: String,
    /// Year applied to timestamps, when fixed for the whole run.
    pub year: Option<i32>,
    /// Whether publishing was skipped.
    pub dry_run: bool,
    pub lines_read: u64,
    pub parsed: u64,
    pub parse_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
    /// Parsed events per domain.
    pub per_domain: BTreeMap<String, u64>,
    /// First few unparseable lines.
    pub failure_samples: Vec<ParseFailureSample>,
}

/// One unparseable line.
#[derive(Debug, Clone, Serialize)]
pub struct ParseFailureSample {
    /// 1-based position among non-blank lines.
    pub line: u64,
    pub reason: String,
}

impl IngestSummary {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

impl Render for IngestSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(w, "Ingest Summary: {}{}", self.source.bold(), mode)?;
        if let Some(year) = self.year {
            writeln!(w, "  Year:             {}", year)?;
        }
        writeln!(w, "  Lines read:       {}", self.lines_read)?;
        writeln!(w, "  Parsed:           {}", self.parsed.to_string().green())?;
        writeln!(
            w,
            "  Parse failures:   {}",
            if self.parse_failures > 0 {
                self.parse_failures.to_string().yellow()
            } else {
                self.parse_failures.to_string().normal()
            }
        )?;
        if !self.dry_run {
            writeln!(w, "  Published:        {}", self.published)?;
            writeln!(
                w,
                "  Publish failures: {}",
                if self.publish_failures > 0 {
                    self.publish_failures.to_string().red()
                } else {
                    self.publish_failures.to_string().normal()
                }
            )?;
        }

        if !self.per_domain.is_empty() {
            writeln!(w)?;
            writeln!(w, "{:<12} {:>10}", "Domain", "Events")?;
            writeln!(w, "{}", "-".repeat(23))?;
            for (domain, count) in &self.per_domain {
                writeln!(w, "{:<12} {:>10}", domain, count)?;
            }
        }

        if !self.failure_samples.is_empty() {
            writeln!(w)?;
            writeln!(w, "Unparsed lines (first {}):", self.failure_samples.len())?;
            for sample in &self.failure_samples {
                writeln!(w, "  line {}: {}", sample.line, sample.reason)?;
            }
        }

        Ok(())
    }
}

/// Parses raw lines and publishes the resulting events.
///
/// Without a bus (dry run) events are only counted.
pub struct EventForwarder {
    parser: LogParser,
    bus: Option<Arc<dyn MessageBus>>,
    summary: IngestSummary,
}

impl EventForwarder {
    pub fn new(parser: LogParser, bus: Option<Arc<dyn MessageBus>>, source: &str) -> Self {
        let mut summary = IngestSummary::new(source);
        summary.dry_run = bus.is_none();
        Self {
            parser,
            bus,
            summary,
        }
    }

    /// Handle one raw line.
    pub async fn forward(&mut self, raw: &RawLine, year: i32) {
        self.summary.lines_read += 1;
        metrics::counter!(m::INGEST_LINES_READ_TOTAL).increment(1);

        let text = raw.text();
        let (event, domain) =
            match self
                .parser
                .parse_received(&text, year, raw.received_at, raw.source_ip)
            {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.summary.parse_failures += 1;
                    metrics::counter!(m::INGEST_PARSE_FAILURES_TOTAL).increment(1);
                    tracing::debug!(
                        source = %raw.source,
                        line = self.summary.lines_read,
                        error = %e,
                        "skipping unparseable line"
                    );
                    if self.summary.failure_samples.len() < MAX_FAILURE_SAMPLES {
                        self.summary.failure_samples.push(ParseFailureSample {
                            line: self.summary.lines_read,
                            reason: e.to_string(),
                        });
                    }
                    return;
                }
            };

        self.summary.parsed += 1;
        *self
            .summary
            .per_domain
            .entry(domain.as_str().to_owned())
            .or_default() += 1;
        metrics::counter!(
            m::INGEST_LINES_PARSED_TOTAL,
            m::LABEL_DOMAIN => domain.as_str()
        )
        .increment(1);

        let Some(bus) = &self.bus else {
            return;
        };

        let subject = logs_subject(domain);
        match publish_json(bus.as_ref(), &subject, &event).await {
            Ok(()) => {
                self.summary.published += 1;
                metrics::counter!(
                    m::INGEST_EVENTS_PUBLISHED_TOTAL,
                    m::LABEL_DOMAIN => domain.as_str()
                )
                .increment(1);
            }
            Err(e) => {
                self.summary.publish_failures += 1;
                metrics::counter!(m::INGEST_PUBLISH_FAILURES_TOTAL).increment(1);
                tracing::warn!(
                    subject = %subject,
                    event_id = %event.event_id,
                    error = %e,
                    "failed to publish log event"
                );
            }
        }
    }

    /// Counters so far.
    pub fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    pub fn into_summary(self) -> IngestSummary {
        self.summary
    }
}
