//! Logging initialization for fleetwatch-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `FleetwatchConfig`. In JSON mode the current span is attached, so lines
//! logged under the `fleetwatch{role=..}` span in `main` name their process.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fleetwatch_core::config::GeneralConfig;

/// Directives appended to the configured level. The NATS client logs every
/// reconnect attempt at `info`; our own bus layer already reports those.
const QUIET_DEPENDENCIES: &str = "async_nats=warn";

/// Build the filter: `RUST_LOG` wins, otherwise `log_level` plus dependency quieting.
pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},{QUIET_DEPENDENCIES}")))
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// * `"json"` - one JSON object per line (default)
/// * `"pretty"` - human-readable multi-line output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = build_filter(&config.log_level);

    let result = match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ));
        }
    };

    result.map_err(|e| {
        anyhow::anyhow!(
            "failed to initialize {} tracing subscriber: {e}",
            config.log_format
        )
    })
}
