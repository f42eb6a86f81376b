//! Health aggregation tests.

use fleetwatch_core::bus::ConnectionState;
use fleetwatch_core::health::HealthStatus;
use fleetwatch_daemon::health::{ComponentHealth, aggregate_status, bus_health};

fn component(name: &str, enabled: bool, status: HealthStatus) -> ComponentHealth {
    ComponentHealth {
        name: name.to_owned(),
        enabled,
        status,
    }
}

#[test]
fn test_aggregate_status_all_healthy() {
    // Given: Bus and agent are healthy
    let components = vec![
        component("bus", true, HealthStatus::Healthy),
        component("agent", true, HealthStatus::Healthy),
    ];

    // When/Then: Overall status is healthy
    assert!(aggregate_status(&components).is_healthy());
}

#[test]
fn test_aggregate_status_degraded_bus() {
    // Given: The bus is reconnecting
    let components = vec![
        component("bus", true, bus_health(ConnectionState::Reconnecting)),
        component("agent", true, HealthStatus::Degraded("bus interrupted".to_owned())),
    ];

    // When: Aggregating status
    let status = aggregate_status(&components);

    // Then: Degraded, with both reasons
    match status {
        HealthStatus::Degraded(reason) => {
            assert!(reason.contains("bus: reconnecting"), "got: {reason}");
            assert!(reason.contains("agent: bus interrupted"), "got: {reason}");
        }
        other => panic!("expected Degraded status, got: {other:?}"),
    }
}

#[test]
fn test_aggregate_status_unhealthy_wins() {
    let components = vec![
        component("bus", true, bus_health(ConnectionState::Lost)),
        component("orchestrator", true, HealthStatus::Degraded("slow".to_owned())),
    ];

    let status = aggregate_status(&components);
    assert!(
        matches!(status, HealthStatus::Unhealthy(ref reason) if reason.contains("connection lost")),
        "unhealthy component should dominate, got: {status:?}"
    );
}

#[test]
fn test_aggregate_status_ignores_disabled_components() {
    let components = vec![
        component("bus", true, HealthStatus::Healthy),
        component("orchestrator", false, HealthStatus::Unhealthy("stopped".to_owned())),
    ];

    assert!(aggregate_status(&components).is_healthy());
}

#[test]
fn test_aggregate_status_empty_is_healthy() {
    assert!(aggregate_status(&[]).is_healthy());
}

#[test]
fn test_bus_health_connected() {
    assert_eq!(bus_health(ConnectionState::Connected), HealthStatus::Healthy);
}
