//! 오케스트레이터 -- 전체 장비군의 Finding 집계와 에이전트 생존 관리
//!
//! [`Orchestrator`]는 `findings.>`를 구독해 모든 도메인의 Finding을 받아
//! 저장하고, `finding_type:resource_id`별 쿨다운으로 하위 알림을 걸러냅니다.
//! 하트비트와 탐색 응답으로 에이전트 레지스트리를 갱신합니다.
//!
//! # 내부 아키텍처
//! ```text
//! findings.>  ──┐
//! heartbeat.> ──┼──> Worker ──> FindingStore (jsonl)
//! discovery   ──┘      │
//!                      ├──> FindingAggregator (active_findings, finding_cooldowns)
//!                      └──> notification mpsc ──> downstream
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetwatch_core::bus::subject::{
    DISCOVERY_BROADCAST, DISCOVERY_RESPONSE, FINDINGS_ALL, HEARTBEAT_ALL,
};
use fleetwatch_core::bus::{MessageBus, publish_json};
use fleetwatch_core::config::OrchestratorConfig;
use fleetwatch_core::error::{FleetwatchError, LifecycleError};
use fleetwatch_core::event::{DiscoveryRequest, Finding};
use fleetwatch_core::health::HealthStatus;
use fleetwatch_core::metrics as m;

use crate::aggregator::{CleanupStats, FindingAggregator};
use crate::error::OrchestratorError;
use crate::registry::{AgentRegistry, AgentView};
use crate::store::{FindingStore, JsonlFindingStore, MemoryFindingStore};
use crate::worker::{Inbox, Worker};

/// 하위 알림 채널 용량
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;
/// 기본 오케스트레이터 ID
const DEFAULT_ORCHESTRATOR_ID: &str = "fleetwatch-orchestrator";

/// 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
}

/// 이벤트 루프와 핸들이 공유하는 메모리 상태
#[derive(Debug)]
pub(crate) struct FleetState {
    pub(crate) aggregator: FindingAggregator,
    pub(crate) registry: AgentRegistry,
}

/// 누적 카운터
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    pub(crate) findings_received: AtomicU64,
    pub(crate) notifications_sent: AtomicU64,
    pub(crate) notifications_suppressed: AtomicU64,
    pub(crate) store_failures: AtomicU64,
    pub(crate) deserialize_failures: AtomicU64,
    pub(crate) degraded: AtomicBool,
}

/// 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// 수신한 Finding 수
    pub findings_received: u64,
    /// 하위로 전달한 알림 수
    pub notifications_sent: u64,
    /// 쿨다운으로 억제한 알림 수
    pub notifications_suppressed: u64,
    /// 저장 실패 수
    pub store_failures: u64,
    /// 역직렬화 실패 수
    pub deserialize_failures: u64,
}

impl OrchestratorStats {
    /// 현재 값을 읽습니다.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            findings_received: self.findings_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_suppressed: self.notifications_suppressed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            deserialize_failures: self.deserialize_failures.load(Ordering::Relaxed),
        }
    }
}

/// 오케스트레이터 설정 값
#[derive(Debug, Clone)]
struct Settings {
    orchestrator_id: String,
    notification_cooldown_secs: u64,
    finding_retention_secs: u64,
    cleanup_interval: Duration,
    heartbeat_interval: Duration,
    registry_path: Option<PathBuf>,
    discovery_on_start: bool,
}

/// 오케스트레이터
///
/// # 사용 예시
/// ```ignore
/// let (mut orchestrator, notifications) = OrchestratorBuilder::new()
///     .config(&config.orchestrator)
///     .heartbeat_interval(Duration::from_secs(config.agent.heartbeat_interval_secs))
///     .bus(bus)
///     .build()?;
///
/// orchestrator.start().await?;
/// ```
pub struct Orchestrator {
    settings: Settings,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn FindingStore>,
    state: Arc<Mutex<FleetState>>,
    stats: Arc<OrchestratorStats>,
    notification_tx: mpsc::Sender<Finding>,
    run_state: RunState,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), FleetwatchError>>>,
}

impl Orchestrator {
    /// 오케스트레이터 ID
    pub fn id(&self) -> &str {
        &self.settings.orchestrator_id
    }

    /// 실행 중인지
    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// 레지스트리를 읽고 구독을 설정한 뒤 이벤트 루프를 시작합니다.
    ///
    /// 레지스트리 파일 형식이 잘못되었으면 시작하지 않습니다.
    pub async fn start(&mut self) -> Result<(), FleetwatchError> {
        if self.run_state == RunState::Running {
            return Err(LifecycleError::AlreadyRunning.into());
        }
        info!(
            id = %self.settings.orchestrator_id,
            store = %self.store.describe(),
            "starting orchestrator"
        );

        let registry = match &self.settings.registry_path {
            Some(path) => AgentRegistry::load(path.clone()).await?,
            None => AgentRegistry::in_memory(),
        };

        let inbox = Inbox {
            findings: self.bus.subscribe(FINDINGS_ALL).await?,
            heartbeats: self.bus.subscribe(HEARTBEAT_ALL).await?,
            discovery: self.bus.subscribe(DISCOVERY_RESPONSE).await?,
        };

        {
            let mut state = self.state.lock().await;
            state.aggregator.clear();
            state.registry = registry;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::ORCHESTRATOR_KNOWN_AGENTS).set(state.registry.len() as f64);
        }
        self.stats.degraded.store(false, Ordering::Relaxed);

        self.cancel = CancellationToken::new();
        let worker = Worker {
            bus: Arc::clone(&self.bus),
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            notification_tx: self.notification_tx.clone(),
            cleanup_interval: self.settings.cleanup_interval,
        };
        self.task = Some(tokio::spawn(worker.run(inbox, self.cancel.clone())));
        self.run_state = RunState::Running;

        if self.settings.discovery_on_start {
            let request = DiscoveryRequest::new(self.settings.orchestrator_id.clone());
            match publish_json(self.bus.as_ref(), DISCOVERY_BROADCAST, &request).await {
                Ok(()) => info!(request_id = %request.request_id, "discovery broadcast sent"),
                Err(e) => warn!(error = %e, "failed to send discovery broadcast"),
            }
        }

        info!(id = %self.settings.orchestrator_id, "orchestrator started");
        Ok(())
    }

    /// 이벤트 루프가 끝날 때까지 기다립니다.
    ///
    /// 루프는 `stop()` 또는 버스 연결의 영구 손실로만 끝납니다. 취소해도 안전합니다.
    pub async fn wait(&mut self) -> Result<(), FleetwatchError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        flatten_join(result)
    }

    /// 구독을 해제하고 메모리 상태를 모두 비웁니다.
    ///
    /// 에이전트 레지스트리는 비우기 전에 파일로 기록합니다.
    /// 저장된 Finding 파일은 건드리지 않습니다.
    pub async fn stop(&mut self) -> Result<(), FleetwatchError> {
        if self.run_state != RunState::Running {
            return Err(LifecycleError::NotRunning.into());
        }
        info!(id = %self.settings.orchestrator_id, "stopping orchestrator");

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = flatten_join(task.await) {
                warn!(error = %e, "orchestrator event loop ended with error");
            }
        }

        let saved = {
            let mut state = self.state.lock().await;
            let saved = state.registry.save().await;
            state.registry.clear();
            state.aggregator.clear();
            saved
        };
        metrics::gauge!(m::ORCHESTRATOR_ACTIVE_FINDINGS).set(0.0);
        metrics::gauge!(m::ORCHESTRATOR_KNOWN_AGENTS).set(0.0);
        self.run_state = RunState::Stopped;

        let stats = self.stats.snapshot();
        info!(
            findings_received = stats.findings_received,
            notifications_sent = stats.notifications_sent,
            notifications_suppressed = stats.notifications_suppressed,
            store_failures = stats.store_failures,
            "orchestrator stopped"
        );

        if let Err(e) = saved {
            error!(error = %e, "failed to write agent registry");
            return Err(e.into());
        }
        Ok(())
    }

    /// 보존 기간 정리를 즉시 실행합니다.
    pub async fn cleanup(&self) -> CleanupStats {
        self.state.lock().await.aggregator.cleanup_at(Utc::now())
    }

    /// 에이전트별 생존 상태
    ///
    /// 하트비트 주기의 3배 동안 신호가 없는 에이전트는 `stale`입니다.
    pub async fn agents_snapshot(&self) -> Vec<AgentView> {
        let interval = chrono::Duration::from_std(self.settings.heartbeat_interval)
            .unwrap_or(chrono::Duration::MAX);
        self.state
            .lock()
            .await
            .registry
            .snapshot_at(Utc::now(), interval)
    }

    /// 메모리에 보관 중인 Finding 수
    pub async fn active_findings(&self) -> usize {
        self.state.lock().await.aggregator.active_count()
    }

    /// 쿨다운 항목 수
    pub async fn cooldown_entries(&self) -> usize {
        self.state.lock().await.aggregator.cooldown_count()
    }

    /// 자원별 Finding 목록 복사본
    pub async fn findings_for(&self, resource_id: &str) -> Vec<Finding> {
        self.state
            .lock()
            .await
            .aggregator
            .findings_for(resource_id)
            .to_vec()
    }

    /// 누적 카운터
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 데몬 상태 보고용 건강 상태
    pub fn health_check(&self) -> HealthStatus {
        match self.run_state {
            RunState::Stopped => HealthStatus::Unhealthy("orchestrator is stopped".to_owned()),
            RunState::Running if self.stats.degraded.load(Ordering::Relaxed) => {
                HealthStatus::Degraded("bus connection interrupted".to_owned())
            }
            RunState::Running => HealthStatus::Healthy,
        }
    }
}

impl Drop for Orchestrator {
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

/// [`Orchestrator`] 빌더
pub struct OrchestratorBuilder {
    orchestrator_id: String,
    bus: Option<Arc<dyn MessageBus>>,
    store: Option<Arc<dyn FindingStore>>,
    findings_path: Option<PathBuf>,
    registry_path: Option<PathBuf>,
    notification_tx: Option<mpsc::Sender<Finding>>,
    notification_cooldown_secs: u64,
    finding_retention_secs: u64,
    cleanup_interval: Duration,
    heartbeat_interval: Duration,
    discovery_on_start: bool,
}

impl OrchestratorBuilder {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            orchestrator_id: DEFAULT_ORCHESTRATOR_ID.to_owned(),
            bus: None,
            store: None,
            findings_path: None,
            registry_path: None,
            notification_tx: None,
            notification_cooldown_secs: defaults.notification_cooldown_secs,
            finding_retention_secs: defaults.finding_retention_secs,
            cleanup_interval: Duration::from_secs(defaults.cleanup_interval_secs),
            heartbeat_interval: Duration::from_secs(30),
            discovery_on_start: defaults.discovery_on_start,
        }
    }

    /// `[orchestrator]` 설정 섹션을 적용합니다.
    ///
    /// 빈 경로는 해당 파일을 사용하지 않는다는 뜻입니다.
    pub fn config(mut self, config: &OrchestratorConfig) -> Self {
        self.notification_cooldown_secs = config.notification_cooldown_secs;
        self.finding_retention_secs = config.finding_retention_secs;
        self.cleanup_interval = Duration::from_secs(config.cleanup_interval_secs);
        self.discovery_on_start = config.discovery_on_start;
        self.registry_path = non_empty_path(&config.registry_path);
        self.findings_path = non_empty_path(&config.findings_path);
        self
    }

    /// 오케스트레이터 ID (탐색 요청의 requester)
    pub fn orchestrator_id(mut self, id: impl Into<String>) -> Self {
        self.orchestrator_id = id.into();
        self
    }

    /// 메시지 버스
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Finding 저장소 (`findings_path`보다 우선)
    pub fn store(mut self, store: Arc<dyn FindingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 에이전트 레지스트리 파일
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// 외부에서 만든 알림 송신 채널
    pub fn notification_sender(mut self, tx: mpsc::Sender<Finding>) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    /// 알림 쿨다운 (초)
    pub fn notification_cooldown_secs(mut self, secs: u64) -> Self {
        self.notification_cooldown_secs = secs;
        self
    }

    /// Finding 보존 기간 (초)
    pub fn finding_retention_secs(mut self, secs: u64) -> Self {
        self.finding_retention_secs = secs;
        self
    }

    /// 정리 작업 주기
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// 에이전트 하트비트 주기 (stale 판정 기준)
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// 시작 시 탐색 브로드캐스트 여부
    pub fn discovery_on_start(mut self, enabled: bool) -> Self {
        self.discovery_on_start = enabled;
        self
    }

    /// 오케스트레이터를 생성합니다.
    ///
    /// 알림 송신자를 지정하지 않았으면 새 채널을 만들고 수신자를 함께 반환합니다.
    pub fn build(
        self,
    ) -> Result<(Orchestrator, Option<mpsc::Receiver<Finding>>), OrchestratorError> {
        let bus = self
            .bus
            .ok_or_else(|| OrchestratorError::Build("message bus is required".to_owned()))?;
        if self.cleanup_interval.is_zero() {
            return Err(OrchestratorError::Build(
                "cleanup interval must be greater than 0".to_owned(),
            ));
        }

        let store: Arc<dyn FindingStore> = match (self.store, self.findings_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonlFindingStore::new(path)),
            (None, None) => {
                warn!("no findings_path configured, findings are kept in memory only");
                Arc::new(MemoryFindingStore::new())
            }
        };

        let (notification_tx, notification_rx) = match self.notification_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
                (tx, Some(rx))
            }
        };

        let settings = Settings {
            orchestrator_id: self.orchestrator_id,
            notification_cooldown_secs: self.notification_cooldown_secs,
            finding_retention_secs: self.finding_retention_secs,
            cleanup_interval: self.cleanup_interval,
            heartbeat_interval: self.heartbeat_interval,
            registry_path: self.registry_path,
            discovery_on_start: self.discovery_on_start,
        };

        let state = FleetState {
            aggregator: FindingAggregator::new(
                settings.notification_cooldown_secs,
                settings.finding_retention_secs,
            ),
            registry: AgentRegistry::in_memory(),
        };

        let orchestrator = Orchestrator {
            settings,
            bus,
            store,
            state: Arc::new(Mutex::new(state)),
            stats: Arc::new(OrchestratorStats::default()),
            notification_tx,
            run_state: RunState::Stopped,
            cancel: CancellationToken::new(),
            task: None,
        };
        Ok((orchestrator, notification_rx))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}
