//! 이벤트 시스템: 프로세스 간에 버스로 오가는 메시지 타입
//!
//! - [`ParsedLogEvent`]: 파서가 만든 구조화된 로그 이벤트 (`logs.<domain>`)
//! - [`Finding`]: 에이전트가 규칙 임계치를 넘었을 때 발행하는 탐지 결과 (`findings.<domain>`)
//! - [`DiscoveryRequest`] / [`DiscoveryMessage`] / [`Heartbeat`]: 에이전트 탐색과 생존 신호
//!
//! 모든 메시지는 JSON으로 직렬화되어 버스를 통과합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentStatus, Severity};

/// 파싱된 로그 이벤트
///
/// 생성 후에는 불변입니다. 도메인별 보강 단계에서 `structured_fields`만 추가됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLogEvent {
    /// 파싱 시점에 생성된 고유 ID (UUID v4)
    pub event_id: String,
    /// 수집 시각
    pub arrival_ts: DateTime<Utc>,
    /// 로그 라인에 기록된 시각 (연도는 추론)
    pub original_ts: DateTime<Utc>,
    /// 호스트명
    pub hostname: String,
    /// 송신 장비 IP (파일 재생 시 없음)
    #[serde(default)]
    pub source_ip: Option<IpAddr>,
    /// 프로세스명 (tag)
    pub process_name: String,
    /// 프로세스 ID
    #[serde(default)]
    pub pid: Option<u32>,
    /// syslog PRI 값 (facility * 8 + severity)
    #[serde(default)]
    pub priority: u8,
    /// 헤더 이후의 원본 메시지
    pub message: String,
    /// 도메인별 보강 필드
    #[serde(default)]
    pub structured_fields: BTreeMap<String, String>,
}

impl ParsedLogEvent {
    /// 새 이벤트를 생성합니다. `event_id`와 `arrival_ts`는 자동으로 채워집니다.
    pub fn new(
        original_ts: DateTime<Utc>,
        hostname: impl Into<String>,
        process_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            arrival_ts: Utc::now(),
            original_ts,
            hostname: hostname.into(),
            source_ip: None,
            process_name: process_name.into(),
            pid: None,
            priority: 0,
            message: message.into(),
            structured_fields: BTreeMap::new(),
        }
    }

    /// 송신 IP를 설정합니다.
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// PID를 설정합니다.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// 보강 필드를 추가합니다.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.structured_fields.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ParsedLogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.original_ts.format("%Y-%m-%dT%H:%M:%SZ"),
            self.hostname,
            self.process_name,
            self.message,
        )
    }
}

/// 탐지 결과
///
/// 에이전트가 한 번 생성하면 이후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// 고유 ID (UUID v4)
    pub finding_id: String,
    /// 발행한 에이전트 이름
    pub agent_name: String,
    /// 탐지 유형 (규칙 이름)
    pub finding_type: String,
    /// 심각도
    pub severity: Severity,
    /// 대상 장비 호스트명
    pub device_hostname: Option<String>,
    /// 대상 장비 IP
    pub device_ip: Option<String>,
    /// 설명
    pub description: String,
    /// 규칙별 상세 정보 (매칭 텍스트, 이벤트 ID 포함)
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// 근거 이벤트 ID 목록
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    /// 생성 시각 (ISO-8601 UTC)
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    /// 새 Finding을 생성합니다.
    pub fn new(
        agent_name: impl Into<String>,
        finding_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            finding_id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            finding_type: finding_type.into(),
            severity,
            device_hostname: None,
            device_ip: None,
            description: description.into(),
            details: serde_json::Map::new(),
            evidence_event_ids: Vec::new(),
            timestamp,
        }
    }

    /// Finding이 가리키는 자원 식별자
    ///
    /// 호스트명, IP, `details.resource_id` 순으로 찾고 모두 없으면 `"unknown"`입니다.
    pub fn resource_id(&self) -> String {
        if let Some(host) = self.device_hostname.as_deref().filter(|h| !h.is_empty()) {
            return host.to_owned();
        }
        if let Some(ip) = self.device_ip.as_deref().filter(|ip| !ip.is_empty()) {
            return ip.to_owned();
        }
        self.details
            .get("resource_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| "unknown".to_owned())
    }

    /// 알림 중복 제거 키: `finding_type:resource_id`
    pub fn finding_key(&self) -> String {
        format!("{}:{}", self.finding_type, self.resource_id())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {} (agent: {})",
            self.severity,
            self.finding_type,
            self.resource_id(),
            self.agent_name,
        )
    }
}

/// 에이전트 상태 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// 상태 문자열 (running, error, stopped 등)
    pub status: String,
    /// 가동 시간 (초)
    pub uptime_seconds: u64,
    /// 마지막 하트비트 시각
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// 처리한 이벤트 수
    pub events_processed: u64,
    /// 발행한 Finding 수
    pub findings_published: u64,
    /// 발행 실패 수
    pub publish_failures: u64,
    /// 역직렬화 실패 수
    pub deserialize_failures: u64,
    /// 추적 중인 (규칙, 키) 상태 수
    pub tracked_keys: usize,
}

/// 탐색 요청 (`agent.discovery.broadcast`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// 요청자 식별자
    pub requester: String,
    /// 요청 ID
    pub request_id: String,
    /// 요청 시각
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryRequest {
    /// 새 탐색 요청을 생성합니다.
    pub fn new(requester: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// 에이전트 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// 에이전트 이름
    pub name: String,
    /// 버전
    pub version: String,
    /// 설명
    pub description: String,
    /// 기능 목록 (로드된 규칙 이름 등)
    pub capabilities: Vec<String>,
    /// 현재 상태
    pub status: AgentStatus,
    /// 공개 설정 값
    #[serde(default)]
    pub config: serde_json::Value,
    /// 상태 스냅샷
    pub health: AgentHealth,
}

/// 탐색 응답 (`agent.discovery.response`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    /// 에이전트 ID
    pub agent_id: String,
    /// 에이전트 유형 (도메인 이름)
    pub agent_type: String,
    /// 응답 시각
    pub timestamp: DateTime<Utc>,
    /// 메타데이터
    pub agent_metadata: AgentMetadata,
}

/// 하트비트 (`agent.heartbeat.<domain>`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// 에이전트 ID
    pub agent_id: String,
    /// 에이전트 유형 (도메인 이름)
    pub agent_type: String,
    /// 전송 시각
    pub timestamp: DateTime<Utc>,
    /// 현재 상태
    pub status: AgentStatus,
    /// 상태 스냅샷
    pub health: AgentHealth,
}
