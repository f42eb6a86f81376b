//! 오케스트레이터 이벤트 루프

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleetwatch_core::bus::{BusMessage, ConnectionState, MessageBus, Subscription};
use fleetwatch_core::error::{FleetwatchError, LifecycleError};
use fleetwatch_core::event::{DiscoveryMessage, Finding, Heartbeat};
use fleetwatch_core::metrics as m;

use crate::aggregator::NotifyDecision;
use crate::orchestrator::{FleetState, OrchestratorStats};
use crate::store::FindingStore;

/// 이벤트 루프가 소유하는 구독
pub(crate) struct Inbox {
    pub(crate) findings: Subscription,
    pub(crate) heartbeats: Subscription,
    pub(crate) discovery: Subscription,
}

pub(crate) struct Worker {
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) store: Arc<dyn FindingStore>,
    pub(crate) state: Arc<Mutex<FleetState>>,
    pub(crate) stats: Arc<OrchestratorStats>,
    pub(crate) notification_tx: mpsc::Sender<Finding>,
    pub(crate) cleanup_interval: Duration,
}

impl Worker {
    pub(crate) async fn run(
        self,
        mut inbox: Inbox,
        cancel: CancellationToken,
    ) -> Result<(), FleetwatchError> {
        let mut cleanup = tokio::time::interval(self.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        cleanup.tick().await;

        let mut connection = self.bus.connection_state();
        // 구독과 루프 시작 사이에 바뀐 상태도 반영
        let initial = *connection.borrow_and_update();
        self.on_connection_state(initial)?;
        let mut watching_connection = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("orchestrator event loop cancelled");
                    break;
                }

                changed = connection.changed(), if watching_connection => {
                    if changed.is_err() {
                        watching_connection = false;
                        continue;
                    }
                    let state = *connection.borrow_and_update();
                    self.on_connection_state(state)?;
                }

                _ = cleanup.tick() => self.cleanup().await,

                msg = inbox.heartbeats.recv() => match msg {
                    Some(msg) => self.handle_heartbeat(&msg).await,
                    None => return subscription_ended(inbox.heartbeats.subject()),
                },

                msg = inbox.discovery.recv() => match msg {
                    Some(msg) => self.handle_discovery(&msg).await,
                    None => return subscription_ended(inbox.discovery.subject()),
                },

                msg = inbox.findings.recv() => match msg {
                    Some(msg) => self.handle_finding(&msg).await,
                    None => return subscription_ended(inbox.findings.subject()),
                },
            }
        }

        Ok(())
    }

    fn on_connection_state(&self, state: ConnectionState) -> Result<(), FleetwatchError> {
        match state {
            ConnectionState::Reconnecting => {
                warn!("bus connection interrupted, waiting for reconnect");
                self.stats.degraded.store(true, Ordering::Relaxed);
                Ok(())
            }
            ConnectionState::Connected => {
                if self.stats.degraded.swap(false, Ordering::Relaxed) {
                    info!("bus connection restored");
                }
                Ok(())
            }
            ConnectionState::Lost => {
                error!("bus connection lost, reconnect attempts exhausted");
                self.stats.degraded.store(true, Ordering::Relaxed);
                Err(LifecycleError::ConnectionLost.into())
            }
        }
    }

    async fn handle_finding(&self, msg: &BusMessage) {
        let Some(finding) = self.decode::<Finding>(msg) else {
            return;
        };

        self.stats.findings_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::ORCHESTRATOR_FINDINGS_RECEIVED_TOTAL,
            m::LABEL_SEVERITY => finding.severity.to_string()
        )
        .increment(1);

        if let Err(e) = self.store.append(&finding).await {
            error!(
                finding_id = %finding.finding_id,
                store = %self.store.describe(),
                error = %e,
                "failed to persist finding, keeping it in memory only"
            );
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::ORCHESTRATOR_STORE_FAILURES_TOTAL).increment(1);
        }

        let decision = {
            let mut state = self.state.lock().await;
            let decision = state.aggregator.record_at(finding.clone(), Utc::now());
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::ORCHESTRATOR_ACTIVE_FINDINGS)
                .set(state.aggregator.active_count() as f64);
            decision
        };

        match decision {
            NotifyDecision::Notify => {
                info!(
                    finding_id = %finding.finding_id,
                    finding_key = %finding.finding_key(),
                    severity = %finding.severity,
                    agent = %finding.agent_name,
                    "forwarding finding notification"
                );
                if self.notification_tx.send(finding).await.is_err() {
                    warn!("notification receiver dropped, notification discarded");
                    return;
                }
                self.stats.notifications_sent.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::ORCHESTRATOR_NOTIFICATIONS_SENT_TOTAL).increment(1);
            }
            NotifyDecision::Suppress { last_notified } => {
                debug!(
                    finding_id = %finding.finding_id,
                    finding_key = %finding.finding_key(),
                    %last_notified,
                    "notification suppressed by cooldown"
                );
                self.stats
                    .notifications_suppressed
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::ORCHESTRATOR_NOTIFICATIONS_SUPPRESSED_TOTAL).increment(1);
            }
        }
    }

    async fn handle_heartbeat(&self, msg: &BusMessage) {
        let Some(heartbeat) = self.decode::<Heartbeat>(msg) else {
            return;
        };
        debug!(agent_id = %heartbeat.agent_id, status = %heartbeat.status, "heartbeat received");

        let mut state = self.state.lock().await;
        state.registry.observe_heartbeat(&heartbeat, Utc::now());
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::ORCHESTRATOR_KNOWN_AGENTS).set(state.registry.len() as f64);
    }

    async fn handle_discovery(&self, msg: &BusMessage) {
        let Some(message) = self.decode::<DiscoveryMessage>(msg) else {
            return;
        };
        debug!(
            agent_id = %message.agent_id,
            agent_type = %message.agent_type,
            capabilities = message.agent_metadata.capabilities.len(),
            "discovery response received"
        );

        let mut state = self.state.lock().await;
        state.registry.observe_discovery(&message, Utc::now());
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::ORCHESTRATOR_KNOWN_AGENTS).set(state.registry.len() as f64);
    }

    async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let stats = state.aggregator.cleanup_at(Utc::now());
        info!(
            findings_removed = stats.findings_removed,
            resources_removed = stats.resources_removed,
            cooldowns_removed = stats.cooldowns_removed,
            active_findings = state.aggregator.active_count(),
            "finding cleanup completed"
        );
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::ORCHESTRATOR_ACTIVE_FINDINGS)
            .set(state.aggregator.active_count() as f64);
    }

    fn decode<T: DeserializeOwned>(&self, msg: &BusMessage) -> Option<T> {
        match serde_json::from_slice(&msg.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "dropping undecodable message");
                self.stats
                    .deserialize_failures
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::ORCHESTRATOR_DESERIALIZE_FAILURES_TOTAL).increment(1);
                None
            }
        }
    }
}

fn subscription_ended(subject: &str) -> Result<(), FleetwatchError> {
    error!(subject, "subscription ended unexpectedly");
    Err(LifecycleError::ConnectionLost.into())
}
