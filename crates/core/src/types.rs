//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 모든 크레이트가 공유하는 심각도와 로그 도메인 분류를 정의합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 심각도 레벨
///
/// Finding의 심각도를 나타냅니다.
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Warning < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 경고
    Warning,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적, 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다. `low`는 `Warning`으로 취급합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "warning" | "warn" | "low" => Some(Self::Warning),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Warning => write!(f, "Warning"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 로그 도메인
///
/// 분류기가 프로세스명으로 결정하는 로그 범주입니다.
/// 도메인마다 하나의 에이전트가 `logs.<domain>` 주제를 구독합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// 무선 (wpa_supplicant, hostapd)
    Wifi,
    /// 인증/보안 (dropbear, sshd)
    Security,
    /// 네트워크 연결 (netifd, dnsmasq)
    Connectivity,
    /// 시스템 (kernel, procd)
    System,
    /// 헬스 모니터링 (watchdog, collectd)
    Health,
    /// 스토리지 (block, mount)
    Storage,
    /// 데이터베이스 (mysqld, postgres)
    Database,
    /// 분류되지 않은 로그
    General,
}

impl Domain {
    /// 모든 도메인 (선언 순서)
    pub const ALL: [Domain; 8] = [
        Domain::Wifi,
        Domain::Security,
        Domain::Connectivity,
        Domain::System,
        Domain::Health,
        Domain::Storage,
        Domain::Database,
        Domain::General,
    ];

    /// 주제 이름에 쓰이는 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Security => "security",
            Self::Connectivity => "connectivity",
            Self::System => "system",
            Self::Health => "health",
            Self::Storage => "storage",
            Self::Database => "database",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(Domain::as_str).collect();
                format!("unknown domain '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// 에이전트 생명주기 상태
///
/// 상태 전환:
/// - `Created` → `Starting` → `Running` → `Stopping` → `Stopped`
/// - `Starting`/`Running` → `Error` (복구 불가능한 연결 실패)
/// - `Error` → `Running` (재연결 성공 시)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// 생성됨 (start 전)
    Created,
    /// 시작 중 (구독 설정)
    Starting,
    /// 실행 중
    Running,
    /// 정지 중
    Stopping,
    /// 정지됨
    Stopped,
    /// 연결 오류
    Error,
}

impl AgentStatus {
    /// 이 상태에서 `next`로 전환할 수 있는지 확인합니다.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Stopping)
                | (Running, Error)
                | (Error, Running)
                | (Error, Stopping)
                | (Starting, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
