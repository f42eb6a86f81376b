//! 에이전트 이벤트 루프
//!
//! 구독 하나당 소비자 하나, 태스크 하나에서 순서대로 처리합니다.
//! 규칙 평가는 동기 함수이고, 대기 지점은 버스 수신/발행뿐입니다.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleetwatch_core::bus::subject::{self, DISCOVERY_RESPONSE};
use fleetwatch_core::bus::{BusMessage, ConnectionState, MessageBus, Subscription, publish_json};
use fleetwatch_core::error::{FleetwatchError, LifecycleError};
use fleetwatch_core::event::{
    DiscoveryMessage, DiscoveryRequest, Finding, Heartbeat, ParsedLogEvent,
};
use fleetwatch_core::metrics as m;
use fleetwatch_core::types::AgentStatus;
use fleetwatch_detection::RuleEngine;

use crate::state::AgentShared;

/// 이벤트 루프가 소유하는 구독
pub(crate) struct Inbox {
    pub(crate) logs: Subscription,
    pub(crate) discovery: Subscription,
}

/// 규칙 엔진을 단독 소유하는 이벤트 루프
pub(crate) struct Worker {
    bus: Arc<dyn MessageBus>,
    shared: Arc<AgentShared>,
    engine: RuleEngine,
    findings_subject: String,
    heartbeat_subject: String,
}

impl Worker {
    pub(crate) fn new(
        bus: Arc<dyn MessageBus>,
        shared: Arc<AgentShared>,
        engine: RuleEngine,
    ) -> Self {
        let domain = shared.settings.domain;
        Self {
            bus,
            shared,
            engine,
            findings_subject: subject::findings_subject(domain),
            heartbeat_subject: subject::heartbeat_subject(domain),
        }
    }

    /// 취소되거나 연결이 영구히 끊길 때까지 메시지를 처리합니다.
    pub(crate) async fn run(
        mut self,
        mut inbox: Inbox,
        cancel: CancellationToken,
    ) -> Result<(), FleetwatchError> {
        let settings = self.shared.settings.clone();
        let mut heartbeat = ticker(settings.heartbeat_interval);
        let mut sweep = ticker(settings.idle_sweep_interval);
        // 첫 틱은 즉시 완료되므로 정리 주기는 한 번 소비하고 시작
        sweep.tick().await;

        let mut connection = self.bus.connection_state();
        // 구독과 루프 시작 사이에 바뀐 상태도 반영
        let initial = *connection.borrow_and_update();
        self.on_connection_state(initial)?;
        let mut watching_connection = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(agent = %settings.agent_id, "event loop cancelled");
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

                _ = heartbeat.tick() => self.publish_heartbeat().await,

                _ = sweep.tick() => self.sweep_idle(),

                msg = inbox.discovery.recv() => match msg {
                    Some(msg) => self.handle_discovery(&msg).await,
                    None => return self.subscription_ended(inbox.discovery.subject()),
                },

                msg = inbox.logs.recv() => match msg {
                    Some(msg) => self.handle_log(&msg).await,
                    None => return self.subscription_ended(inbox.logs.subject()),
                },
            }
        }

        Ok(())
    }

    fn on_connection_state(&self, state: ConnectionState) -> Result<(), FleetwatchError> {
        let agent = &self.shared.settings.agent_id;
        match state {
            ConnectionState::Reconnecting => {
                if self.shared.status() == AgentStatus::Running {
                    warn!(agent = %agent, "bus connection interrupted, waiting for reconnect");
                    let _ = self.shared.transition(AgentStatus::Error);
                }
                Ok(())
            }
            ConnectionState::Connected => {
                if self.shared.status() == AgentStatus::Error {
                    info!(agent = %agent, "bus connection restored");
                    let _ = self.shared.transition(AgentStatus::Running);
                }
                Ok(())
            }
            ConnectionState::Lost => {
                error!(agent = %agent, "bus connection lost, reconnect attempts exhausted");
                let _ = self.shared.transition(AgentStatus::Error);
                Err(LifecycleError::ConnectionLost.into())
            }
        }
    }

    fn subscription_ended(&self, subject: &str) -> Result<(), FleetwatchError> {
        error!(
            agent = %self.shared.settings.agent_id,
            subject,
            "subscription ended unexpectedly"
        );
        let _ = self.shared.transition(AgentStatus::Error);
        Err(LifecycleError::ConnectionLost.into())
    }

    async fn handle_log(&mut self, msg: &BusMessage) {
        let domain = self.shared.settings.domain.as_str();
        let event: ParsedLogEvent = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    agent = %self.shared.settings.agent_id,
                    subject = %msg.subject,
                    error = %e,
                    "dropping undecodable log event"
                );
                self.shared
                    .stats
                    .deserialize_failures
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::AGENT_DESERIALIZE_FAILURES_TOTAL, m::LABEL_DOMAIN => domain)
                    .increment(1);
                return;
            }
        };

        self.shared
            .stats
            .events_processed
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::AGENT_EVENTS_PROCESSED_TOTAL, m::LABEL_DOMAIN => domain).increment(1);

        for finding in self.engine.process(&event) {
            self.publish_finding(&finding).await;
        }
        self.update_tracked_keys();
    }

    async fn publish_finding(&self, finding: &Finding) {
        match publish_json(self.bus.as_ref(), &self.findings_subject, finding).await {
            Ok(()) => {
                info!(
                    finding_id = %finding.finding_id,
                    finding_type = %finding.finding_type,
                    resource = %finding.resource_id(),
                    severity = %finding.severity,
                    "finding published"
                );
                self.shared
                    .stats
                    .findings_published
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    m::AGENT_FINDINGS_PUBLISHED_TOTAL,
                    m::LABEL_RULE => finding.finding_type.clone()
                )
                .increment(1);
            }
            Err(e) => {
                error!(
                    finding_id = %finding.finding_id,
                    finding_type = %finding.finding_type,
                    subject = %self.findings_subject,
                    error = %e,
                    "failed to publish finding, finding dropped"
                );
                self.shared
                    .stats
                    .publish_failures
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::AGENT_PUBLISH_FAILURES_TOTAL).increment(1);
            }
        }
    }

    async fn handle_discovery(&self, msg: &BusMessage) {
        let request: DiscoveryRequest = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    agent = %self.shared.settings.agent_id,
                    error = %e,
                    "ignoring malformed discovery request"
                );
                self.shared
                    .stats
                    .deserialize_failures
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        debug!(
            agent = %self.shared.settings.agent_id,
            requester = %request.requester,
            request_id = %request.request_id,
            "answering discovery request"
        );
        announce(self.bus.as_ref(), &self.shared).await;
    }

    async fn publish_heartbeat(&self) {
        let now = Utc::now();
        let settings = &self.shared.settings;
        let mut heartbeat = Heartbeat {
            agent_id: settings.agent_id.clone(),
            agent_type: settings.domain.as_str().to_owned(),
            timestamp: now,
            status: self.shared.status(),
            health: self.shared.health(),
        };
        heartbeat.health.last_heartbeat = Some(now);

        match publish_json(self.bus.as_ref(), &self.heartbeat_subject, &heartbeat).await {
            Ok(()) => self.shared.stats.record_heartbeat(now),
            Err(e) => warn!(agent = %settings.agent_id, error = %e, "failed to publish heartbeat"),
        }
    }

    fn sweep_idle(&mut self) {
        let removed = self.engine.sweep_idle();
        if removed > 0 {
            debug!(
                agent = %self.shared.settings.agent_id,
                removed,
                remaining = self.engine.tracked_keys(),
                "idle rule state swept"
            );
        }
        self.update_tracked_keys();
    }

    fn update_tracked_keys(&self) {
        let tracked = self.engine.tracked_keys();
        self.shared
            .stats
            .tracked_keys
            .store(tracked, Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(
            m::AGENT_TRACKED_KEYS,
            m::LABEL_DOMAIN => self.shared.settings.domain.as_str()
        )
        .set(tracked as f64);
    }
}

/// 에이전트 식별 정보를 `agent.discovery.response`로 발행합니다.
pub(crate) async fn announce(bus: &dyn MessageBus, shared: &AgentShared) {
    let settings = &shared.settings;
    let message = DiscoveryMessage {
        agent_id: settings.agent_id.clone(),
        agent_type: settings.domain.as_str().to_owned(),
        timestamp: Utc::now(),
        agent_metadata: shared.metadata(),
    };
    if let Err(e) = publish_json(bus, DISCOVERY_RESPONSE, &message).await {
        warn!(agent = %settings.agent_id, error = %e, "failed to publish discovery response");
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
