//! Integration tests for `fleetwatch ingest`.
//!
//! Replays real files through the parser onto the in-process bus.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use fleetwatch_cli::commands::ingest::ingest_file;
use fleetwatch_cli::error::CliError;
use fleetwatch_core::bus::{ConnectionState, InMemoryBus, MessageBus};
use fleetwatch_core::event::ParsedLogEvent;
use fleetwatch_detection::LogParser;

const LOG: &str = "\
<30>Jul  4 09:15:02 ap-07 hostapd: wlan0: STA aa:bb:cc:dd:ee:ff IEEE 802.11: disassociated
<2>Jul  4 09:15:03 gw-01 kernel: Out of memory: Killed process 4242 (dnsmasq)

this line is not syslog
<86>Jul  4 09:15:09 gw-01 dropbear[1733]: Bad password attempt for 'root' from 10.0.0.9:51234
";

fn write_log(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, LOG).expect("should write log file");
    path
}

#[tokio::test]
async fn test_dry_run_counts_lines_and_domains() {
    // Given: A dated log file with one blank and one malformed line
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_log(temp_dir.path(), "fleet_20230704.log");

    // When: Replaying without a bus
    let summary = ingest_file(&path, None, LogParser::new(), None, CancellationToken::new())
        .await
        .expect("dry run should succeed");

    // Then: Blank lines are skipped and the failure is counted
    assert!(summary.dry_run);
    assert_eq!(summary.year, Some(2023), "year comes from the file name");
    assert_eq!(summary.lines_read, 4);
    assert_eq!(summary.parsed, 3);
    assert_eq!(summary.parse_failures, 1);
    assert_eq!(summary.published, 0);
    assert_eq!(summary.per_domain.get("wifi"), Some(&1));
    assert_eq!(summary.per_domain.get("system"), Some(&1));
    assert_eq!(summary.per_domain.get("security"), Some(&1));
    assert_eq!(summary.failure_samples[0].line, 3);
}

#[tokio::test]
async fn test_publishes_events_to_domain_subjects() {
    // Given: A bus with a catch-all log subscriber
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_log(temp_dir.path(), "gw-01_20230704.log");
    let bus = Arc::new(InMemoryBus::new());
    let mut logs = bus.subscribe("logs.>").await.unwrap();

    // When: Replaying onto the bus
    let summary = ingest_file(
        &path,
        None,
        LogParser::new(),
        Some(bus.clone() as Arc<dyn MessageBus>),
        CancellationToken::new(),
    )
    .await
    .expect("ingest should succeed");

    // Then: Every parsed line was published in file order
    assert_eq!(summary.published, 3);
    assert_eq!(summary.publish_failures, 0);

    let mut subjects = Vec::new();
    for _ in 0..3 {
        let msg = timeout(Duration::from_secs(2), logs.recv())
            .await
            .expect("message should arrive")
            .expect("subscription open");
        let event: ParsedLogEvent = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(event.original_ts.year(), 2023);
        subjects.push(msg.subject);
    }
    assert_eq!(subjects, ["logs.wifi", "logs.system", "logs.security"]);
}

#[tokio::test]
async fn test_year_flag_overrides_filename() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_log(temp_dir.path(), "fleet_20230704.log");

    let summary = ingest_file(
        &path,
        Some(2021),
        LogParser::new(),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.year, Some(2021));
}

#[tokio::test]
async fn test_publish_failures_do_not_stop_replay() {
    // Given: A bus that is reconnecting
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_log(temp_dir.path(), "fleet_20230704.log");
    let bus = Arc::new(InMemoryBus::new());
    bus.set_connection_state(ConnectionState::Reconnecting);

    // When: Replaying
    let summary = ingest_file(
        &path,
        None,
        LogParser::new(),
        Some(bus as Arc<dyn MessageBus>),
        CancellationToken::new(),
    )
    .await
    .expect("publish failures are counted, not fatal");

    // Then: All lines were still read
    assert_eq!(summary.lines_read, 4);
    assert_eq!(summary.published, 0);
    assert_eq!(summary.publish_failures, 3);
}

#[tokio::test]
async fn test_missing_file_is_collector_error() {
    let result = ingest_file(
        Path::new("/nonexistent/fleet_20230704.log"),
        None,
        LogParser::new(),
        None,
        CancellationToken::new(),
    )
    .await;

    let err = result.expect_err("missing file should fail");
    assert!(matches!(err, CliError::Collector(_)), "got: {err:?}");
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_cancelled_replay_returns_partial_summary() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_log(temp_dir.path(), "fleet_20230704.log");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = ingest_file(&path, None, LogParser::new(), None, cancel)
        .await
        .expect("cancellation is not an error");

    assert_eq!(summary.lines_read, 0);
}
