//! Daemon integration tests.
//!
//! Runs each role end to end on the in-process bus:
//! build -> start -> traffic -> shutdown trigger -> stop -> bus close.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::timeout;

use fleetwatch_core::bus::subject::{FINDINGS_ALL, NOTIFICATIONS};
use fleetwatch_core::bus::{ConnectionState, InMemoryBus, MessageBus, publish_json};
use fleetwatch_core::config::FleetwatchConfig;
use fleetwatch_core::event::{Finding, ParsedLogEvent};
use fleetwatch_core::health::HealthStatus;
use fleetwatch_core::types::{Domain, Severity};
use fleetwatch_daemon::daemon::{Daemon, Role};

const WAIT: Duration = Duration::from_secs(5);

const RULES: &str = r#"
system:
  KernelOutOfMemory:
    patterns:
      - "Out of memory"
    occurrence_threshold: 1
    time_window_seconds: 60
    severity: Critical
"#;

fn write_rules(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("rules.yaml");
    std::fs::write(&path, RULES).expect("should write rules");
    path
}

fn agent_role(rules_path: std::path::PathBuf) -> Role {
    Role::Agent {
        domain: Domain::System,
        agent_id: Some("system-agent-it".to_owned()),
        rules_path,
    }
}

fn orchestrator_config(dir: &Path) -> FleetwatchConfig {
    let mut config = FleetwatchConfig::default();
    config.orchestrator.registry_path = dir.join("agents.json").display().to_string();
    config.orchestrator.findings_path = dir.join("findings.jsonl").display().to_string();
    config
}

async fn wait_for_subscribers(bus: &InMemoryBus, expected: usize) {
    for _ in 0..500 {
        if bus.subscriber_count().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscribers never reached {expected}");
}

#[tokio::test]
async fn test_agent_role_publishes_finding_and_shuts_down_cleanly() {
    // Given: An agent daemon with a one-rule table
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let mut findings = bus.subscribe(FINDINGS_ALL).await.unwrap();
    let mut daemon = Daemon::build(
        FleetwatchConfig::default(),
        agent_role(write_rules(dir.path())),
        bus.clone(),
    )
    .await
    .expect("agent daemon should build");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = daemon.run_until(async {
        let _ = shutdown_rx.await;
        Ok("test")
    });

    // When: A matching log event arrives, then shutdown is requested
    let drive = async {
        wait_for_subscribers(&bus, 3).await;
        let event = ParsedLogEvent::new(
            Utc::now(),
            "gw-01",
            "kernel",
            "Out of memory: Killed process 4242 (dnsmasq)",
        );
        publish_json(bus.as_ref(), "logs.system", &event)
            .await
            .unwrap();

        let msg = timeout(WAIT, findings.recv()).await.unwrap().unwrap();
        let _ = shutdown_tx.send(());
        msg
    };
    let (result, msg) = tokio::join!(run, drive);

    // Then: The finding was published and shutdown succeeded
    assert!(result.is_ok(), "signal-driven shutdown should be Ok: {result:?}");
    assert_eq!(msg.subject, "findings.system");
    let finding: Finding = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(finding.agent_name, "system-agent-it");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(bus.subscriber_count().await, 0, "bus should be closed");
}

#[tokio::test]
async fn test_orchestrator_role_forwards_notifications_and_persists() {
    // Given: An orchestrator daemon with file-backed storage
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let mut notifications = bus.subscribe(NOTIFICATIONS).await.unwrap();
    let mut daemon = Daemon::build(
        orchestrator_config(dir.path()),
        Role::Orchestrator,
        bus.clone(),
    )
    .await
    .expect("orchestrator daemon should build");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = daemon.run_until(async {
        let _ = shutdown_rx.await;
        Ok("test")
    });

    // When: An agent publishes a finding
    let mut finding = Finding::new(
        "wifi-agent",
        "ApDisconnect",
        Severity::Warning,
        "Access point dropped clients",
        Utc::now(),
    );
    finding.device_hostname = Some("ap-07".to_owned());
    let finding_id = finding.finding_id.clone();

    let drive = async {
        wait_for_subscribers(&bus, 4).await;
        publish_json(bus.as_ref(), "findings.wifi", &finding)
            .await
            .unwrap();
        let msg = timeout(WAIT, notifications.recv()).await.unwrap().unwrap();
        let _ = shutdown_tx.send(());
        msg
    };
    let (result, msg) = tokio::join!(run, drive);

    // Then: It was forwarded downstream and written to disk
    assert!(result.is_ok(), "signal-driven shutdown should be Ok: {result:?}");
    let forwarded: Finding = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(forwarded.finding_id, finding_id);

    let stored = std::fs::read_to_string(dir.path().join("findings.jsonl")).unwrap();
    assert_eq!(stored.lines().count(), 1);
    assert!(stored.contains(&finding_id));
    assert!(
        dir.path().join("agents.json").exists(),
        "registry should be written on stop"
    );
}

#[tokio::test]
async fn test_permanent_bus_loss_is_fatal() {
    // Given: A running agent daemon
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let mut daemon = Daemon::build(
        FleetwatchConfig::default(),
        agent_role(write_rules(dir.path())),
        bus.clone(),
    )
    .await
    .unwrap();

    // Sender stays alive so only the bus loss can end the run
    let (_shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = daemon.run_until(async {
        let _ = shutdown_rx.await;
        Ok("test")
    });

    // When: The bus gives up reconnecting
    let drive = async {
        wait_for_subscribers(&bus, 2).await;
        bus.set_connection_state(ConnectionState::Lost);
    };
    let (result, ()) = timeout(WAIT, async { tokio::join!(run, drive) })
        .await
        .expect("daemon should exit after bus loss");

    // Then: The run ends with an error (non-zero exit)
    let err = result.expect_err("bus loss should be fatal");
    assert!(
        err.to_string().contains("connection lost"),
        "error should mention the lost connection, got: {err}"
    );
}

#[tokio::test]
async fn test_missing_rule_table_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let result = Daemon::build(
        FleetwatchConfig::default(),
        agent_role(dir.path().join("absent.yaml")),
        Arc::new(InMemoryBus::new()),
    )
    .await;

    let err = result.err().expect("missing rules should fail");
    assert!(err.to_string().contains("failed to load rules"));
}

#[tokio::test]
async fn test_invalid_config_fails_build() {
    let mut config = FleetwatchConfig::default();
    config.orchestrator.cleanup_interval_secs = 0;

    let result = Daemon::build(config, Role::Orchestrator, Arc::new(InMemoryBus::new())).await;
    let err = result.err().expect("invalid config should fail");
    assert!(err.to_string().contains("cleanup_interval_secs"));
}

#[tokio::test]
async fn test_health_before_start_reports_component_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = Daemon::build(
        orchestrator_config(dir.path()),
        Role::Orchestrator,
        Arc::new(InMemoryBus::new()),
    )
    .await
    .unwrap();

    let health = daemon.health();
    assert_eq!(health.role, "orchestrator");
    assert_eq!(health.components.len(), 2);
    assert!(health.components[0].status.is_healthy(), "bus is connected");
    assert!(matches!(
        health.status,
        HealthStatus::Unhealthy(ref reason) if reason.contains("orchestrator")
    ));
}
