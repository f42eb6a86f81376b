//! Aggregated health reporting.
//!
//! A daemon process hosts one role component plus its bus connection.
//! The overall status is the worst status among enabled components.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use fleetwatch_core::bus::ConnectionState;
use fleetwatch_core::health::HealthStatus;

/// Aggregated health report for the daemon process.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Role this process runs (`agent:<domain>` or `orchestrator`).
    pub role: String,
    /// Overall status (worst of all components).
    pub status: HealthStatus,
    /// Uptime in seconds since the daemon was built.
    pub uptime_secs: u64,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
}

/// Health status for a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name (e.g., "bus", "agent", "orchestrator").
    pub name: String,
    /// Whether the component is enabled.
    pub enabled: bool,
    /// Current health status.
    pub status: HealthStatus,
}

/// Map the bus connection state onto a health status.
pub fn bus_health(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Reconnecting => HealthStatus::Degraded("reconnecting".to_owned()),
        ConnectionState::Lost => HealthStatus::Unhealthy("connection lost".to_owned()),
    }
}

/// Aggregate component statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Disabled components are ignored.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components.iter().filter(|c| c.enabled) {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", component.name, reason));
                worst = worst.worst(component.status.clone());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}
