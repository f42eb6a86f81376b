//! 에이전트 레지스트리
//!
//! 알려진 에이전트 목록을 JSON 파일로 보관합니다. 시작 시 파일을 읽고,
//! 하트비트와 탐색 응답으로 메모리 상태를 갱신하며, 정지 시 다시 기록합니다.
//!
//! 파일이 없으면 빈 레지스트리로 시작하고, 형식이 잘못되었으면 에러입니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use fleetwatch_core::event::{DiscoveryMessage, Heartbeat};
use fleetwatch_core::types::{AgentStatus, Domain};

use crate::error::OrchestratorError;

/// 마지막 신호 이후 이 배수의 하트비트 주기가 지나면 stale
const STALE_AFTER_HEARTBEATS: i32 = 3;

/// 레지스트리 파일에 기록되는 에이전트 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// 에이전트 ID
    pub agent_id: String,
    /// 표시 이름
    pub name: String,
    /// 에이전트 유형 (도메인 이름)
    pub agent_type: String,
    /// 담당 도메인
    #[serde(default)]
    pub domain: Option<Domain>,
    /// 기능 목록
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentRecord {
    fn new(agent_id: &str, agent_type: &str) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            name: agent_id.to_owned(),
            agent_type: agent_type.to_owned(),
            domain: agent_type.parse().ok(),
            capabilities: Vec::new(),
        }
    }
}

/// 에이전트 생존 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// 최근 신호 있음
    Live,
    /// 하트비트 3주기 이상 신호 없음
    Stale,
    /// 이번 실행에서 아직 신호 없음
    Unseen,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Stale => write!(f, "stale"),
            Self::Unseen => write!(f, "unseen"),
        }
    }
}

/// 에이전트 상태 조회 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    /// 등록 정보
    #[serde(flatten)]
    pub record: AgentRecord,
    /// 마지막으로 보고된 상태
    pub status: Option<AgentStatus>,
    /// 마지막 신호 시각
    pub last_seen: Option<DateTime<Utc>>,
    /// 생존 판정
    pub liveness: Liveness,
}

#[derive(Debug, Clone)]
struct AgentEntry {
    record: AgentRecord,
    status: Option<AgentStatus>,
    last_seen: Option<DateTime<Utc>>,
}

/// 에이전트 레지스트리
#[derive(Debug, Default)]
pub struct AgentRegistry {
    path: Option<PathBuf>,
    agents: BTreeMap<String, AgentEntry>,
}

impl AgentRegistry {
    /// 파일 없이 메모리만 사용하는 레지스트리
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 레지스트리 파일을 읽습니다.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let path = path.into();
        let mut registry = Self {
            path: Some(path.clone()),
            agents: BTreeMap::new(),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no agent registry yet, starting empty");
                return Ok(registry);
            }
            Err(e) => return Err(registry_error(&path, e)),
        };

        if content.trim().is_empty() {
            return Ok(registry);
        }
        let records: Vec<AgentRecord> =
            serde_json::from_str(&content).map_err(|e| registry_error(&path, e))?;
        for record in records {
            registry.agents.insert(
                record.agent_id.clone(),
                AgentEntry {
                    record,
                    status: None,
                    last_seen: None,
                },
            );
        }

        tracing::info!(path = %path.display(), agents = registry.len(), "agent registry loaded");
        Ok(registry)
    }

    /// 등록 정보를 파일에 기록합니다. 임시 파일에 쓴 뒤 교체합니다.
    pub async fn save(&self) -> Result<(), OrchestratorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| registry_error(path, e))?;
        }

        let records: Vec<&AgentRecord> = self.agents.values().map(|e| &e.record).collect();
        let json = serde_json::to_vec_pretty(&records).map_err(|e| registry_error(path, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| registry_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| registry_error(path, e))?;

        tracing::debug!(path = %path.display(), agents = records.len(), "agent registry saved");
        Ok(())
    }

    /// 하트비트를 반영합니다. 새 에이전트면 등록합니다.
    pub fn observe_heartbeat(&mut self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> bool {
        let (entry, added) = self.entry(&heartbeat.agent_id, &heartbeat.agent_type);
        entry.status = Some(heartbeat.status);
        entry.last_seen = Some(now);
        added
    }

    /// 탐색 응답을 반영합니다. 이름과 기능 목록도 갱신합니다.
    pub fn observe_discovery(&mut self, message: &DiscoveryMessage, now: DateTime<Utc>) -> bool {
        let (entry, added) = self.entry(&message.agent_id, &message.agent_type);
        let metadata = &message.agent_metadata;
        if !metadata.name.is_empty() {
            entry.record.name = metadata.name.clone();
        }
        entry.record.capabilities = metadata.capabilities.clone();
        entry.status = Some(metadata.status);
        entry.last_seen = Some(now);
        added
    }

    fn entry(&mut self, agent_id: &str, agent_type: &str) -> (&mut AgentEntry, bool) {
        let added = !self.agents.contains_key(agent_id);
        if added {
            tracing::info!(agent_id, agent_type, "new agent registered");
        }
        let entry = self
            .agents
            .entry(agent_id.to_owned())
            .or_insert_with(|| AgentEntry {
                record: AgentRecord::new(agent_id, agent_type),
                status: None,
                last_seen: None,
            });
        entry.record.agent_type = agent_type.to_owned();
        if let Ok(domain) = agent_type.parse() {
            entry.record.domain = Some(domain);
        }
        (entry, added)
    }

    /// 에이전트별 생존 상태를 계산합니다.
    pub fn snapshot_at(&self, now: DateTime<Utc>, heartbeat_interval: Duration) -> Vec<AgentView> {
        let stale_after = heartbeat_interval
            .checked_mul(STALE_AFTER_HEARTBEATS)
            .unwrap_or(Duration::MAX);

        self.agents
            .values()
            .map(|entry| {
                let liveness = match entry.last_seen {
                    None => Liveness::Unseen,
                    Some(seen) if now - seen > stale_after => Liveness::Stale,
                    Some(_) => Liveness::Live,
                };
                AgentView {
                    record: entry.record.clone(),
                    status: entry.status,
                    last_seen: entry.last_seen,
                    liveness,
                }
            })
            .collect()
    }

    /// 등록 정보
    pub fn get(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_id).map(|e| &e.record)
    }

    /// 알려진 에이전트 수
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// 비어 있는지
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 메모리 상태를 비웁니다. 파일은 건드리지 않습니다.
    pub fn clear(&mut self) {
        self.agents.clear();
    }
}

fn registry_error(path: &Path, reason: impl ToString) -> OrchestratorError {
    OrchestratorError::Registry {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fleetwatch_core::event::{AgentHealth, AgentMetadata};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn heartbeat(agent_id: &str, agent_type: &str) -> Heartbeat {
        Heartbeat {
            agent_id: agent_id.to_owned(),
            agent_type: agent_type.to_owned(),
            timestamp: t(0),
            status: AgentStatus::Running,
            health: AgentHealth::default(),
        }
    }

    fn discovery(agent_id: &str, capabilities: &[&str]) -> DiscoveryMessage {
        DiscoveryMessage {
            agent_id: agent_id.to_owned(),
            agent_type: "security".to_owned(),
            timestamp: t(0),
            agent_metadata: AgentMetadata {
                name: format!("{agent_id} (edge)"),
                version: "0.1.0".to_owned(),
                description: "security log anomaly detection agent".to_owned(),
                capabilities: capabilities.iter().map(|c| (*c).to_owned()).collect(),
                status: AgentStatus::Running,
                config: serde_json::Value::Null,
                health: AgentHealth::default(),
            },
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::load(dir.path().join("agents.json"))
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        tokio::fs::write(&path, "{ not a list").await.unwrap();
        let err = AgentRegistry::load(&path).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Registry { .. }));
    }

    #[tokio::test]
    async fn save_then_load_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("agents.json");

        let mut registry = AgentRegistry::load(&path).await.unwrap();
        registry.observe_discovery(&discovery("security-agent", &["RepeatedSSHLoginFailure"]), t(0));
        registry.observe_heartbeat(&heartbeat("wifi-agent", "wifi"), t(0));
        registry.save().await.unwrap();

        let reloaded = AgentRegistry::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        let record = reloaded.get("security-agent").unwrap();
        assert_eq!(record.name, "security-agent (edge)");
        assert_eq!(record.domain, Some(Domain::Security));
        assert_eq!(record.capabilities, vec!["RepeatedSSHLoginFailure"]);

        // 재로딩 직후에는 신호가 없음
        let views = reloaded.snapshot_at(t(10), Duration::seconds(30));
        assert!(views.iter().all(|v| v.liveness == Liveness::Unseen));
    }

    #[test]
    fn heartbeat_registers_new_agent_once() {
        let mut registry = AgentRegistry::in_memory();
        assert!(registry.observe_heartbeat(&heartbeat("wifi-agent", "wifi"), t(0)));
        assert!(!registry.observe_heartbeat(&heartbeat("wifi-agent", "wifi"), t(30)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("wifi-agent").unwrap().domain, Some(Domain::Wifi));
    }

    #[test]
    fn agent_is_stale_after_three_missed_heartbeats() {
        let mut registry = AgentRegistry::in_memory();
        registry.observe_heartbeat(&heartbeat("wifi-agent", "wifi"), t(0));
        let interval = Duration::seconds(30);

        let view = &registry.snapshot_at(t(90), interval)[0];
        assert_eq!(view.liveness, Liveness::Live);
        assert_eq!(view.status, Some(AgentStatus::Running));

        let view = &registry.snapshot_at(t(91), interval)[0];
        assert_eq!(view.liveness, Liveness::Stale);
    }

    #[test]
    fn unknown_agent_type_keeps_no_domain() {
        let mut registry = AgentRegistry::in_memory();
        registry.observe_heartbeat(&heartbeat("custom-agent", "custom"), t(0));
        assert_eq!(registry.get("custom-agent").unwrap().domain, None);
    }

    #[test]
    fn view_serializes_flat() {
        let mut registry = AgentRegistry::in_memory();
        registry.observe_heartbeat(&heartbeat("wifi-agent", "wifi"), t(0));
        let json = serde_json::to_value(&registry.snapshot_at(t(0), Duration::seconds(30))[0])
            .unwrap();
        assert_eq!(json["agent_id"], "wifi-agent");
        assert_eq!(json["liveness"], "live");
        assert_eq!(json["status"], "running");
    }
}
