//! Process assembly, role wiring, and lifecycle management.
//!
//! The [`Daemon`] owns the bus connection and exactly one role component:
//! a [`DomainAgent`] for `agent --domain <d>`, or the fleet [`Orchestrator`].
//!
//! # Lifecycle
//!
//! 1. Connect to the bus (bounded retries, fatal on exhaustion)
//! 2. Build the role component (agents load their rule table here)
//! 3. Start it and spawn background tasks (notification forwarder, uptime)
//! 4. Wait for SIGTERM/SIGINT or a fatal runtime failure
//! 5. Stop the component first, then background tasks, then close the bus
//!
//! A signal-driven shutdown returns `Ok(())`. Losing the bus permanently
//! returns an error so the process exits non-zero and a supervisor restarts it.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use fleetwatch_agent::{DomainAgent, DomainAgentBuilder};
use fleetwatch_core::bus::subject::NOTIFICATIONS;
use fleetwatch_core::bus::{MessageBus, NatsBus, publish_json};
use fleetwatch_core::config::FleetwatchConfig;
use fleetwatch_core::error::FleetwatchError;
use fleetwatch_core::event::Finding;
use fleetwatch_core::health::HealthStatus;
use fleetwatch_core::types::Domain;
use fleetwatch_detection::RuleLoader;
use fleetwatch_orchestrator::{Orchestrator, OrchestratorBuilder};

use crate::cli::RoleCommand;
use crate::health::{ComponentHealth, DaemonHealth, aggregate_status, bus_health};
use crate::metrics_server;

/// Uptime gauge refresh period.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Resolved process role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Domain agent for one log domain.
    Agent {
        /// Domain the agent evaluates.
        domain: Domain,
        /// Identifier override (CLI beats config).
        agent_id: Option<String>,
        /// Rule table file or directory.
        rules_path: PathBuf,
    },
    /// Fleet orchestrator.
    Orchestrator,
}

impl Role {
    /// Combine the CLI subcommand with the config file.
    ///
    /// CLI values take precedence over `[agent]` settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no domain is given or the domain is unknown.
    pub fn resolve(command: &RoleCommand, config: &FleetwatchConfig) -> Result<Self> {
        match command {
            RoleCommand::Agent {
                domain,
                agent_id,
                rules,
            } => {
                let name = domain
                    .as_deref()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or(config.agent.domain.as_str());
                if name.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "agent domain is required: pass --domain or set [agent].domain"
                    ));
                }
                let domain = name.parse::<Domain>().map_err(|e| anyhow::anyhow!(e))?;
                let rules_path = rules
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&config.agent.rules_path));

                Ok(Self::Agent {
                    domain,
                    agent_id: agent_id.clone(),
                    rules_path,
                })
            }
            RoleCommand::Orchestrator => Ok(Self::Orchestrator),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent { domain, .. } => write!(f, "agent:{domain}"),
            Self::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

/// The role component hosted by this process.
enum Service {
    Agent(DomainAgent),
    Orchestrator {
        orchestrator: Orchestrator,
        notifications: Option<mpsc::Receiver<Finding>>,
    },
}

impl Service {
    fn name(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Orchestrator { .. } => "orchestrator",
        }
    }

    async fn start(&mut self) -> Result<(), FleetwatchError> {
        match self {
            Self::Agent(agent) => agent.start().await,
            Self::Orchestrator { orchestrator, .. } => orchestrator.start().await,
        }
    }

    async fn wait(&mut self) -> Result<(), FleetwatchError> {
        match self {
            Self::Agent(agent) => agent.wait().await,
            Self::Orchestrator { orchestrator, .. } => orchestrator.wait().await,
        }
    }

    async fn stop(&mut self) -> Result<(), FleetwatchError> {
        match self {
            Self::Agent(agent) => agent.stop().await,
            Self::Orchestrator { orchestrator, .. } => orchestrator.stop().await,
        }
    }

    fn health_check(&self) -> HealthStatus {
        match self {
            Self::Agent(agent) => agent.health_check(),
            Self::Orchestrator { orchestrator, .. } => orchestrator.health_check(),
        }
    }

    fn take_notifications(&mut self) -> Option<mpsc::Receiver<Finding>> {
        match self {
            Self::Agent(_) => None,
            Self::Orchestrator { notifications, .. } => notifications.take(),
        }
    }
}

/// The daemon process.
pub struct Daemon {
    /// Loaded and validated configuration.
    config: FleetwatchConfig,
    /// Role this process runs.
    role: Role,
    /// Shared bus connection (owned here, closed on shutdown).
    bus: Arc<dyn MessageBus>,
    /// Hosted component.
    service: Service,
    /// Shutdown broadcast for background tasks.
    shutdown_tx: broadcast::Sender<()>,
    /// Build time (for uptime reporting).
    start_time: Instant,
}

impl Daemon {
    /// Install the metrics recorder, connect to the bus, and build the role component.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The metrics endpoint cannot be installed
    /// - The bus cannot be reached within `[bus].max_reconnect_attempts`
    /// - The role component fails to build (e.g. unreadable rule table)
    pub async fn connect(config: FleetwatchConfig, role: Role) -> Result<Self> {
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info(&role);
        }

        let bus = NatsBus::connect(&config.bus)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to message bus: {}", e))?;
        Self::build(config, role, Arc::new(bus)).await
    }

    /// Build the role component on an existing bus.
    pub async fn build(
        config: FleetwatchConfig,
        role: Role,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let service = match &role {
            Role::Agent {
                domain,
                agent_id,
                rules_path,
            } => {
                let table = RuleLoader::load_path(rules_path).await.map_err(|e| {
                    anyhow::anyhow!("failed to load rules from {}: {}", rules_path.display(), e)
                })?;
                if !table.skipped().is_empty() {
                    tracing::warn!(
                        skipped = table.skipped().len(),
                        path = %rules_path.display(),
                        "some rule entries were skipped"
                    );
                }
                let rules = table.rules_for(*domain);
                tracing::info!(domain = %domain, rules = rules.len(), "rule table loaded");

                let mut builder = DomainAgentBuilder::new(*domain)
                    .config(&config.agent)?
                    .bus(Arc::clone(&bus))
                    .rules(rules);
                if let Some(id) = agent_id {
                    builder = builder.agent_id(id.clone());
                }
                Service::Agent(builder.build()?)
            }
            Role::Orchestrator => {
                let (orchestrator, notifications) = OrchestratorBuilder::new()
                    .config(&config.orchestrator)
                    .heartbeat_interval(Duration::from_secs(config.agent.heartbeat_interval_secs))
                    .bus(Arc::clone(&bus))
                    .build()?;
                Service::Orchestrator {
                    orchestrator,
                    notifications,
                }
            }
        };

        let (shutdown_tx, _) = broadcast::channel(16);
        tracing::info!(role = %role, "daemon initialized");

        Ok(Self {
            config,
            role,
            bus,
            service,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the role component and block until SIGTERM/SIGINT or a fatal failure.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the role component and block until `shutdown` resolves or a fatal failure.
    ///
    /// `shutdown` yields the name of the trigger, used only for logging.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let role = self.role.to_string();
        self.service
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start {}: {}", role, e))?;

        let mut forwarder = self.service.take_notifications().map(|rx| {
            spawn_notification_forwarder(Arc::clone(&self.bus), rx, self.shutdown_tx.subscribe())
        });
        let mut uptime_updater = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!(role = %role, "entering main event loop");
        let mut outcome = tokio::select! {
            signal = shutdown => signal.map(|signal| {
                tracing::info!(signal, "shutdown signal received");
            }),
            result = self.service.wait() => match result {
                Ok(()) => Err(anyhow::anyhow!("{} event loop exited unexpectedly", role)),
                Err(e) => {
                    tracing::error!(role = %role, error = %e, "fatal runtime failure");
                    Err(anyhow::anyhow!("{} failed: {}", role, e))
                }
            },
        };

        // Producers stop first so the forwarder can drain what is left
        if let Err(e) = self.service.stop().await {
            tracing::error!(component = self.service.name(), error = %e, "failed to stop cleanly");
            if outcome.is_ok() {
                outcome = Err(anyhow::anyhow!("failed to stop {}: {}", role, e));
            }
        }

        let _ = self.shutdown_tx.send(());
        if let Some(task) = forwarder.take() {
            let _ = task.await;
        }
        if let Some(task) = uptime_updater.take() {
            let _ = task.await;
        }

        if let Err(e) = self.bus.close().await {
            tracing::warn!(error = %e, "failed to close message bus");
        }

        outcome
    }

    /// Current aggregated health.
    pub fn health(&self) -> DaemonHealth {
        let bus_state = *self.bus.connection_state().borrow();
        let components = vec![
            ComponentHealth {
                name: "bus".to_owned(),
                enabled: true,
                status: bus_health(bus_state),
            },
            ComponentHealth {
                name: self.service.name().to_owned(),
                enabled: true,
                status: self.service.health_check(),
            },
        ];

        DaemonHealth {
            role: self.role.to_string(),
            status: aggregate_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
        }
    }

    /// Role this daemon runs.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Loaded configuration.
    pub fn config(&self) -> &FleetwatchConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Publish orchestrator notifications to `notifications.findings`.
///
/// On shutdown, whatever is already queued is still published.
fn spawn_notification_forwarder(
    bus: Arc<dyn MessageBus>,
    mut rx: mpsc::Receiver<Finding>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    while let Ok(finding) = rx.try_recv() {
                        forward(bus.as_ref(), &finding).await;
                    }
                    tracing::debug!("notification forwarder shutting down");
                    break;
                }
                received = rx.recv() => match received {
                    Some(finding) => forward(bus.as_ref(), &finding).await,
                    None => {
                        tracing::debug!("notification channel closed, exiting forwarder");
                        break;
                    }
                },
            }
        }
    })
}

async fn forward(bus: &dyn MessageBus, finding: &Finding) {
    match publish_json(bus, NOTIFICATIONS, finding).await {
        Ok(()) => tracing::info!(
            finding_id = %finding.finding_id,
            finding_key = %finding.finding_key(),
            severity = %finding.severity,
            "notification published"
        ),
        Err(e) => tracing::error!(
            finding_id = %finding.finding_id,
            error = %e,
            "failed to publish notification"
        ),
    }
}

/// Record the build info gauge (always 1, labelled with version and role).
fn record_build_info(role: &Role) {
    use fleetwatch_core::metrics as m;

    metrics::gauge!(
        m::DAEMON_BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
        "role" => role.to_string()
    )
    .set(1.0);
}

/// Periodically refresh the uptime gauge until shutdown.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use fleetwatch_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::bus::InMemoryBus;
    use fleetwatch_core::types::Severity;

    fn agent_command(domain: Option<&str>) -> RoleCommand {
        RoleCommand::Agent {
            domain: domain.map(str::to_owned),
            agent_id: None,
            rules: None,
        }
    }

    #[test]
    fn resolve_prefers_cli_domain() {
        let mut config = FleetwatchConfig::default();
        config.agent.domain = "system".to_owned();

        let role = Role::resolve(&agent_command(Some("wifi")), &config).unwrap();
        assert!(matches!(role, Role::Agent { domain: Domain::Wifi, .. }));
        assert_eq!(role.to_string(), "agent:wifi");
    }

    #[test]
    fn resolve_falls_back_to_config_domain() {
        let mut config = FleetwatchConfig::default();
        config.agent.domain = "security".to_owned();
        config.agent.rules_path = "/srv/rules.yaml".to_owned();

        let role = Role::resolve(&agent_command(None), &config).unwrap();
        assert_eq!(
            role,
            Role::Agent {
                domain: Domain::Security,
                agent_id: None,
                rules_path: PathBuf::from("/srv/rules.yaml"),
            }
        );
    }

    #[test]
    fn resolve_requires_some_domain() {
        let err = Role::resolve(&agent_command(None), &FleetwatchConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--domain"));
    }

    #[test]
    fn resolve_rejects_unknown_domain() {
        let err =
            Role::resolve(&agent_command(Some("toaster")), &FleetwatchConfig::default()).unwrap_err();
        assert!(err.to_string().contains("toaster"));
    }

    #[tokio::test]
    async fn forwarder_drains_queue_on_shutdown() {
        let bus = Arc::new(InMemoryBus::new());
        let mut sub = bus.subscribe(NOTIFICATIONS).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for host in ["gw-01", "gw-02"] {
            let mut finding = Finding::new(
                "orchestrator-test",
                "KernelOutOfMemory",
                Severity::Critical,
                "oom",
                chrono::Utc::now(),
            );
            finding.device_hostname = Some(host.to_owned());
            tx.send(finding).await.unwrap();
        }
        shutdown_tx.send(()).unwrap();

        let task = spawn_notification_forwarder(bus.clone(), rx, shutdown_rx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn uptime_updater_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_uptime_updater(Instant::now(), shutdown_rx);
        let _ = shutdown_tx.send(());
        let result = tokio::time::timeout(Duration::from_millis(200), task).await;
        assert!(result.is_ok(), "uptime updater should shut down within timeout");
    }
}
