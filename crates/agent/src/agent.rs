//! 도메인 에이전트 -- 규칙 엔진 하나를 메시지 버스에 연결
//!
//! [`DomainAgent`]는 한 도메인의 규칙 테이블로 [`RuleEngine`]을 만들고,
//! `logs.<domain>`에서 이벤트를 받아 `findings.<domain>`으로 Finding을 발행합니다.
//!
//! # 상태 머신
//! ```text
//! created -> starting -> running -> stopping -> stopped
//!                 |        ^    |         ^
//!                 |        |    v         |
//!                 +-----> error ----------+
//! ```
//!
//! `error`는 버스 재연결 대기 상태이며, 재연결되면 `running`으로 돌아갑니다.
//!
//! 규칙 엔진은 `start()`에서 만들어 이벤트 루프 태스크로 옮기고,
//! `stop()`에서 태스크와 함께 버립니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetwatch_core::bus::MessageBus;
use fleetwatch_core::bus::subject::{self, DISCOVERY_BROADCAST};
use fleetwatch_core::config::AgentConfig;
use fleetwatch_core::error::{FleetwatchError, LifecycleError};
use fleetwatch_core::event::{AgentHealth, AgentMetadata};
use fleetwatch_core::health::HealthStatus;
use fleetwatch_core::types::{AgentStatus, Domain};
use fleetwatch_detection::{RuleDefinition, RuleEngine, TimeBasis};

use crate::error::AgentError;
use crate::state::{AgentSettings, AgentShared};
use crate::worker::{self, Inbox, Worker};

/// 기본 하트비트 주기
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// 기본 유휴 키 정리 주기
const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// 기본 최대 추적 키 수
const DEFAULT_MAX_TRACKED_KEYS: usize = 100_000;

/// 도메인 에이전트
///
/// # 사용 예시
/// ```ignore
/// let table = RuleLoader::load_path(&config.agent.rules_path)?;
/// let mut agent = DomainAgentBuilder::new(Domain::Security)
///     .config(&config.agent)?
///     .bus(bus)
///     .rules(table.rules_for(Domain::Security))
///     .build()?;
///
/// agent.start().await?;
/// // ...
/// agent.stop().await?;
/// ```
pub struct DomainAgent {
    bus: Arc<dyn MessageBus>,
    rules: Vec<RuleDefinition>,
    shared: Arc<AgentShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), FleetwatchError>>>,
}

impl DomainAgent {
    /// 에이전트 ID
    pub fn agent_id(&self) -> &str {
        &self.shared.settings.agent_id
    }

    /// 담당 도메인
    pub fn domain(&self) -> Domain {
        self.shared.settings.domain
    }

    /// 현재 상태
    pub fn status(&self) -> AgentStatus {
        self.shared.status()
    }

    /// 상태 변화를 관찰하는 수신자
    pub fn status_watch(&self) -> watch::Receiver<AgentStatus> {
        self.shared.subscribe_status()
    }

    /// 설정된 규칙 정의 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 에이전트를 시작합니다.
    ///
    /// 도메인 로그 주제와 탐색 브로드캐스트를 구독하고, 규칙 엔진을 만든 뒤
    /// 이벤트 루프를 스폰합니다. 구독 실패 시 `error` 상태로 남습니다.
    pub async fn start(&mut self) -> Result<(), FleetwatchError> {
        match self.status() {
            AgentStatus::Created => {}
            AgentStatus::Running | AgentStatus::Starting | AgentStatus::Error => {
                return Err(LifecycleError::AlreadyRunning.into());
            }
            other => {
                return Err(LifecycleError::InvalidTransition {
                    from: other.to_string(),
                    to: AgentStatus::Starting.to_string(),
                }
                .into());
            }
        }
        self.shared.transition(AgentStatus::Starting)?;

        let settings = &self.shared.settings;
        info!(
            agent = %settings.agent_id,
            domain = %settings.domain,
            rules = self.rules.len(),
            "starting domain agent"
        );

        let inbox = match self.subscribe(settings.domain).await {
            Ok(inbox) => inbox,
            Err(e) => {
                error!(agent = %settings.agent_id, error = %e, "failed to subscribe");
                let _ = self.shared.transition(AgentStatus::Error);
                return Err(e);
            }
        };

        let mut engine = RuleEngine::new(settings.agent_id.clone())
            .with_max_tracked_keys(settings.max_tracked_keys)
            .with_time_basis(settings.time_basis);
        let report = engine.load(self.rules.clone());
        if report.active == 0 {
            warn!(agent = %settings.agent_id, "no active rules, agent will never emit findings");
        }
        let capabilities = engine
            .rules()
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.name().to_owned())
            .collect();
        self.shared.mark_started(capabilities);

        self.shared.transition(AgentStatus::Running)?;
        worker::announce(self.bus.as_ref(), &self.shared).await;

        let worker = Worker::new(Arc::clone(&self.bus), Arc::clone(&self.shared), engine);
        self.task = Some(tokio::spawn(worker.run(inbox, self.cancel.clone())));

        info!(agent = %self.shared.settings.agent_id, "domain agent started");
        Ok(())
    }

    async fn subscribe(&self, domain: Domain) -> Result<Inbox, FleetwatchError> {
        let logs = self.bus.subscribe(&subject::logs_subject(domain)).await?;
        let discovery = self.bus.subscribe(DISCOVERY_BROADCAST).await?;
        Ok(Inbox { logs, discovery })
    }

    /// 이벤트 루프가 끝날 때까지 기다립니다.
    ///
    /// 루프는 `stop()`으로 취소되거나 버스 연결이 영구히 끊겼을 때만 끝납니다.
    /// 실행 중이 아니면 즉시 반환합니다. 취소해도 안전합니다.
    pub async fn wait(&mut self) -> Result<(), FleetwatchError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        flatten_join(result)
    }

    /// 에이전트를 정지합니다.
    ///
    /// 처리 중인 메시지를 마친 뒤 구독을 해제하고 규칙 엔진 상태를 버립니다.
    /// 버스 연결 자체는 소유자가 닫습니다.
    pub async fn stop(&mut self) -> Result<(), FleetwatchError> {
        match self.status() {
            AgentStatus::Created | AgentStatus::Stopped => {
                return Err(LifecycleError::NotRunning.into());
            }
            _ => {}
        }
        self.shared.transition(AgentStatus::Stopping)?;
        info!(agent = %self.shared.settings.agent_id, "stopping domain agent");

        self.cancel.cancel();
        let outcome = match self.task.take() {
            Some(task) => flatten_join(task.await),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            warn!(agent = %self.shared.settings.agent_id, error = %e, "event loop ended with error");
        }

        self.shared.transition(AgentStatus::Stopped)?;
        let health = self.shared.health();
        info!(
            agent = %self.shared.settings.agent_id,
            status = %health.status,
            events_processed = health.events_processed,
            findings_published = health.findings_published,
            publish_failures = health.publish_failures,
            "domain agent stopped"
        );
        Ok(())
    }

    /// 상태 스냅샷
    pub fn health(&self) -> AgentHealth {
        self.shared.health()
    }

    /// 탐색 응답용 메타데이터
    pub fn metadata(&self) -> AgentMetadata {
        self.shared.metadata()
    }

    /// 데몬 상태 보고용 건강 상태
    pub fn health_check(&self) -> HealthStatus {
        match self.status() {
            AgentStatus::Running => HealthStatus::Healthy,
            AgentStatus::Error => HealthStatus::Degraded("bus connection interrupted".to_owned()),
            other => HealthStatus::Unhealthy(format!("agent is {other}")),
        }
    }
}

impl Drop for DomainAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn flatten_join(
    result: Result<Result<(), FleetwatchError>, tokio::task::JoinError>,
) -> Result<(), FleetwatchError> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(LifecycleError::TaskFailed(e.to_string()).into()),
    }
}

/// [`DomainAgent`] 빌더
pub struct DomainAgentBuilder {
    domain: Domain,
    agent_id: Option<String>,
    bus: Option<Arc<dyn MessageBus>>,
    rules: Vec<RuleDefinition>,
    heartbeat_interval: Duration,
    idle_sweep_interval: Duration,
    max_tracked_keys: usize,
    time_basis: TimeBasis,
}

impl DomainAgentBuilder {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            agent_id: None,
            bus: None,
            rules: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_sweep_interval: DEFAULT_IDLE_SWEEP_INTERVAL,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            time_basis: TimeBasis::default(),
        }
    }

    /// `[agent]` 설정 섹션을 적용합니다.
    pub fn config(mut self, config: &AgentConfig) -> Result<Self, AgentError> {
        if !config.agent_id.is_empty() {
            self.agent_id = Some(config.agent_id.clone());
        }
        self.heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
        self.idle_sweep_interval = Duration::from_secs(config.idle_sweep_interval_secs);
        self.max_tracked_keys = config.max_tracked_keys;
        self.time_basis = config
            .time_basis
            .parse()
            .map_err(|reason| AgentError::Config {
                field: "time_basis".to_owned(),
                reason,
            })?;
        Ok(self)
    }

    /// 에이전트 ID (기본값 `<domain>-agent`)
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// 메시지 버스
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 이 도메인의 규칙 정의
    pub fn rules(mut self, rules: Vec<RuleDefinition>) -> Self {
        self.rules = rules;
        self
    }

    /// 하트비트 주기
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// 유휴 키 정리 주기
    pub fn idle_sweep_interval(mut self, interval: Duration) -> Self {
        self.idle_sweep_interval = interval;
        self
    }

    /// 최대 추적 키 수
    pub fn max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max;
        self
    }

    /// 윈도우 기준 시각
    pub fn time_basis(mut self, basis: TimeBasis) -> Self {
        self.time_basis = basis;
        self
    }

    /// 에이전트를 생성합니다.
    pub fn build(self) -> Result<DomainAgent, AgentError> {
        let bus = self
            .bus
            .ok_or_else(|| AgentError::Build("message bus is required".to_owned()))?;

        if self.heartbeat_interval.is_zero() {
            return Err(AgentError::Config {
                field: "heartbeat_interval_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.idle_sweep_interval.is_zero() {
            return Err(AgentError::Config {
                field: "idle_sweep_interval_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_tracked_keys == 0 {
            return Err(AgentError::Config {
                field: "max_tracked_keys".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let agent_id = self
            .agent_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}-agent", self.domain));

        let settings = AgentSettings {
            agent_id,
            domain: self.domain,
            heartbeat_interval: self.heartbeat_interval,
            idle_sweep_interval: self.idle_sweep_interval,
            max_tracked_keys: self.max_tracked_keys,
            time_basis: self.time_basis,
        };

        Ok(DomainAgent {
            bus,
            rules: self.rules,
            shared: Arc::new(AgentShared::new(settings)),
            cancel: CancellationToken::new(),
            task: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::bus::InMemoryBus;

    fn bus() -> Arc<dyn MessageBus> {
        Arc::new(InMemoryBus::new())
    }

    #[test]
    fn builder_requires_bus() {
        let err = DomainAgentBuilder::new(Domain::Wifi).build().err().unwrap();
        assert!(matches!(err, AgentError::Build(_)));
    }

    #[test]
    fn builder_defaults_agent_id_from_domain() {
        let agent = DomainAgentBuilder::new(Domain::Storage)
            .bus(bus())
            .build()
            .unwrap();
        assert_eq!(agent.agent_id(), "storage-agent");
        assert_eq!(agent.domain(), Domain::Storage);
        assert_eq!(agent.status(), AgentStatus::Created);
    }

    #[test]
    fn builder_rejects_zero_intervals() {
        let err = DomainAgentBuilder::new(Domain::Wifi)
            .bus(bus())
            .heartbeat_interval(Duration::ZERO)
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("heartbeat_interval_secs"));

        let err = DomainAgentBuilder::new(Domain::Wifi)
            .bus(bus())
            .idle_sweep_interval(Duration::ZERO)
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("idle_sweep_interval_secs"));
    }

    #[test]
    fn config_section_is_applied() {
        let config = AgentConfig {
            agent_id: "edge-sec-1".to_owned(),
            heartbeat_interval_secs: 5,
            time_basis: "event".to_owned(),
            ..AgentConfig::default()
        };
        let agent = DomainAgentBuilder::new(Domain::Security)
            .config(&config)
            .unwrap()
            .bus(bus())
            .build()
            .unwrap();
        assert_eq!(agent.agent_id(), "edge-sec-1");
        assert_eq!(agent.shared.settings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(agent.shared.settings.time_basis, TimeBasis::Event);
    }

    #[test]
    fn config_with_unknown_time_basis_is_rejected() {
        let config = AgentConfig {
            time_basis: "wallclock".to_owned(),
            ..AgentConfig::default()
        };
        let err = DomainAgentBuilder::new(Domain::Security)
            .config(&config)
            .err()
            .unwrap();
        assert!(err.to_string().contains("time_basis"));
    }

    #[tokio::test]
    async fn stop_before_start_is_not_running() {
        let mut agent = DomainAgentBuilder::new(Domain::Wifi)
            .bus(bus())
            .build()
            .unwrap();
        let err = agent.stop().await.unwrap_err();
        assert!(matches!(
            err,
            FleetwatchError::Lifecycle(LifecycleError::NotRunning)
        ));
    }

    #[test]
    fn health_check_reflects_status() {
        let agent = DomainAgentBuilder::new(Domain::Wifi)
            .bus(bus())
            .build()
            .unwrap();
        assert!(!agent.health_check().is_healthy());
        agent.shared.transition(AgentStatus::Starting).unwrap();
        agent.shared.transition(AgentStatus::Running).unwrap();
        assert!(agent.health_check().is_healthy());
        agent.shared.transition(AgentStatus::Error).unwrap();
        assert!(matches!(agent.health_check(), HealthStatus::Degraded(_)));
    }
}
