//! 에이전트 공유 상태 -- 상태 머신, 카운터, 상태 스냅샷
//!
//! [`AgentShared`]는 [`DomainAgent`](crate::DomainAgent) 핸들과 이벤트 루프 태스크가
//! 함께 참조합니다. 규칙 엔진 상태는 여기 두지 않고 이벤트 루프가 단독으로 소유합니다.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use fleetwatch_core::error::LifecycleError;
use fleetwatch_core::event::{AgentHealth, AgentMetadata};
use fleetwatch_core::types::{AgentStatus, Domain};
use fleetwatch_detection::TimeBasis;

/// 에이전트 실행 설정
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// 에이전트 ID
    pub agent_id: String,
    /// 담당 도메인
    pub domain: Domain,
    /// 하트비트 주기
    pub heartbeat_interval: Duration,
    /// 유휴 키 정리 주기
    pub idle_sweep_interval: Duration,
    /// 엔진당 최대 추적 키 수
    pub max_tracked_keys: usize,
    /// 윈도우 기준 시각
    pub time_basis: TimeBasis,
}

/// 누적 카운터
#[derive(Debug, Default)]
pub struct AgentStats {
    pub(crate) events_processed: AtomicU64,
    pub(crate) findings_published: AtomicU64,
    pub(crate) publish_failures: AtomicU64,
    pub(crate) deserialize_failures: AtomicU64,
    pub(crate) tracked_keys: AtomicUsize,
    /// 마지막 하트비트 (Unix 밀리초, 없으면 `i64::MIN`)
    last_heartbeat_ms: AtomicI64,
}

impl AgentStats {
    fn new() -> Self {
        Self {
            last_heartbeat_ms: AtomicI64::new(i64::MIN),
            ..Self::default()
        }
    }

    pub(crate) fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.last_heartbeat_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// 마지막 하트비트 시각
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            i64::MIN => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// 처리한 이벤트 수
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    /// 발행한 Finding 수
    pub fn findings_published(&self) -> u64 {
        self.findings_published.load(Ordering::Relaxed)
    }

    /// Finding 발행 실패 수
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// 역직렬화 실패 수
    pub fn deserialize_failures(&self) -> u64 {
        self.deserialize_failures.load(Ordering::Relaxed)
    }
}

/// 핸들과 이벤트 루프가 공유하는 상태
#[derive(Debug)]
pub struct AgentShared {
    pub(crate) settings: AgentSettings,
    status: watch::Sender<AgentStatus>,
    pub(crate) stats: AgentStats,
    started_at: OnceLock<Instant>,
    capabilities: OnceLock<Vec<String>>,
}

impl AgentShared {
    pub(crate) fn new(settings: AgentSettings) -> Self {
        let (status, _) = watch::channel(AgentStatus::Created);
        Self {
            settings,
            status,
            stats: AgentStats::new(),
            started_at: OnceLock::new(),
            capabilities: OnceLock::new(),
        }
    }

    /// 현재 상태
    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    /// 상태를 전환합니다. 허용되지 않는 전환이면 상태를 바꾸지 않습니다.
    pub(crate) fn transition(&self, next: AgentStatus) -> Result<AgentStatus, LifecycleError> {
        let mut outcome = Err(LifecycleError::InvalidTransition {
            from: String::new(),
            to: next.to_string(),
        });
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                outcome = Ok(*current);
                *current = next;
                true
            } else {
                outcome = Err(LifecycleError::InvalidTransition {
                    from: current.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });

        if let Ok(previous) = outcome {
            tracing::info!(
                agent = %self.settings.agent_id,
                from = %previous,
                to = %next,
                "agent state changed"
            );
        }
        outcome
    }

    pub(crate) fn mark_started(&self, capabilities: Vec<String>) {
        let _ = self.started_at.set(Instant::now());
        let _ = self.capabilities.set(capabilities);
    }

    /// 가동 시간 (시작 전이면 0)
    pub fn uptime(&self) -> Duration {
        self.started_at
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    /// 상태 스냅샷
    pub fn health(&self) -> AgentHealth {
        AgentHealth {
            status: self.status().to_string(),
            uptime_seconds: self.uptime().as_secs(),
            last_heartbeat: self.stats.last_heartbeat(),
            events_processed: self.stats.events_processed(),
            findings_published: self.stats.findings_published(),
            publish_failures: self.stats.publish_failures(),
            deserialize_failures: self.stats.deserialize_failures(),
            tracked_keys: self.stats.tracked_keys.load(Ordering::Relaxed),
        }
    }

    /// 탐색 응답용 메타데이터
    pub fn metadata(&self) -> AgentMetadata {
        let settings = &self.settings;
        let capabilities = self.capabilities.get().cloned().unwrap_or_default();
        AgentMetadata {
            name: settings.agent_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            description: format!("{} log anomaly detection agent", settings.domain),
            config: serde_json::json!({
                "domain": settings.domain.as_str(),
                "heartbeat_interval_secs": settings.heartbeat_interval.as_secs(),
                "idle_sweep_interval_secs": settings.idle_sweep_interval.as_secs(),
                "max_tracked_keys": settings.max_tracked_keys,
                "active_rules": capabilities.len(),
            }),
            capabilities,
            status: self.status(),
            health: self.health(),
        }
    }
}
