//! 설정 관리: fleetwatch.toml 파싱 및 런타임 설정
//!
//! [`FleetwatchConfig`]는 모든 프로세스(에이전트, 오케스트레이터, CLI)의 설정을 담는
//! 최상위 구조체입니다. 각 프로세스는 자기에게 필요한 섹션만 읽습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FLEETWATCH_BUS_URL=nats://bus:4222` 형식)
//! 3. 설정 파일 (`fleetwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), fleetwatch_core::error::FleetwatchError> {
//! use fleetwatch_core::config::FleetwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FleetwatchConfig::load("fleetwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FleetwatchConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FleetwatchError};
use crate::types::Domain;

/// Fleetwatch 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메시지 버스 설정
    #[serde(default)]
    pub bus: BusConfig,
    /// 도메인 에이전트 설정
    #[serde(default)]
    pub agent: AgentConfig,
    /// 오케스트레이터 설정
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// 파서 설정
    #[serde(default)]
    pub parser: ParserConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FleetwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FleetwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FleetwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FleetwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FleetwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FleetwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            FleetwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLEETWATCH_{SECTION}_{FIELD}`
    /// 예: `FLEETWATCH_AGENT_HEARTBEAT_INTERVAL_SECS=10`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLEETWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLEETWATCH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "FLEETWATCH_GENERAL_DATA_DIR");

        // Bus
        override_string(&mut self.bus.url, "FLEETWATCH_BUS_URL");
        override_string(&mut self.bus.client_name, "FLEETWATCH_BUS_CLIENT_NAME");
        override_u64(
            &mut self.bus.connect_timeout_secs,
            "FLEETWATCH_BUS_CONNECT_TIMEOUT_SECS",
        );
        override_u32(
            &mut self.bus.max_reconnect_attempts,
            "FLEETWATCH_BUS_MAX_RECONNECT_ATTEMPTS",
        );
        override_u64(
            &mut self.bus.reconnect_base_delay_ms,
            "FLEETWATCH_BUS_RECONNECT_BASE_DELAY_MS",
        );
        override_u64(
            &mut self.bus.reconnect_max_delay_ms,
            "FLEETWATCH_BUS_RECONNECT_MAX_DELAY_MS",
        );

        // Agent
        override_string(&mut self.agent.agent_id, "FLEETWATCH_AGENT_AGENT_ID");
        override_string(&mut self.agent.domain, "FLEETWATCH_AGENT_DOMAIN");
        override_string(&mut self.agent.rules_path, "FLEETWATCH_AGENT_RULES_PATH");
        override_u64(
            &mut self.agent.heartbeat_interval_secs,
            "FLEETWATCH_AGENT_HEARTBEAT_INTERVAL_SECS",
        );
        override_u64(
            &mut self.agent.idle_sweep_interval_secs,
            "FLEETWATCH_AGENT_IDLE_SWEEP_INTERVAL_SECS",
        );
        override_usize(
            &mut self.agent.max_tracked_keys,
            "FLEETWATCH_AGENT_MAX_TRACKED_KEYS",
        );
        override_string(&mut self.agent.time_basis, "FLEETWATCH_AGENT_TIME_BASIS");

        // Orchestrator
        override_u64(
            &mut self.orchestrator.notification_cooldown_secs,
            "FLEETWATCH_ORCHESTRATOR_NOTIFICATION_COOLDOWN_SECS",
        );
        override_u64(
            &mut self.orchestrator.cleanup_interval_secs,
            "FLEETWATCH_ORCHESTRATOR_CLEANUP_INTERVAL_SECS",
        );
        override_u64(
            &mut self.orchestrator.finding_retention_secs,
            "FLEETWATCH_ORCHESTRATOR_FINDING_RETENTION_SECS",
        );
        override_string(
            &mut self.orchestrator.registry_path,
            "FLEETWATCH_ORCHESTRATOR_REGISTRY_PATH",
        );
        override_string(
            &mut self.orchestrator.findings_path,
            "FLEETWATCH_ORCHESTRATOR_FINDINGS_PATH",
        );
        override_bool(
            &mut self.orchestrator.discovery_on_start,
            "FLEETWATCH_ORCHESTRATOR_DISCOVERY_ON_START",
        );

        // Parser
        override_i32(
            &mut self.parser.utc_offset_minutes,
            "FLEETWATCH_PARSER_UTC_OFFSET_MINUTES",
        );
        override_usize(
            &mut self.parser.max_line_length,
            "FLEETWATCH_PARSER_MAX_LINE_LENGTH",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "FLEETWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "FLEETWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "FLEETWATCH_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FleetwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.bus.url.is_empty() {
            return Err(invalid("bus.url", "must not be empty".to_owned()));
        }
        if self.bus.max_reconnect_attempts == 0 {
            return Err(invalid(
                "bus.max_reconnect_attempts",
                "must be at least 1".to_owned(),
            ));
        }
        if self.bus.reconnect_base_delay_ms > self.bus.reconnect_max_delay_ms {
            return Err(invalid(
                "bus.reconnect_base_delay_ms",
                "must not exceed bus.reconnect_max_delay_ms".to_owned(),
            ));
        }

        if !self.agent.domain.is_empty() {
            if let Err(reason) = self.agent.domain.parse::<Domain>() {
                return Err(invalid("agent.domain", reason));
            }
        }
        if self.agent.heartbeat_interval_secs == 0 {
            return Err(invalid(
                "agent.heartbeat_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.agent.idle_sweep_interval_secs == 0 {
            return Err(invalid(
                "agent.idle_sweep_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.agent.max_tracked_keys == 0 {
            return Err(invalid(
                "agent.max_tracked_keys",
                "must be greater than 0".to_owned(),
            ));
        }
        if !matches!(self.agent.time_basis.as_str(), "processing" | "event") {
            return Err(invalid(
                "agent.time_basis",
                format!(
                    "must be 'processing' or 'event', got '{}'",
                    self.agent.time_basis
                ),
            ));
        }

        if self.orchestrator.cleanup_interval_secs == 0 {
            return Err(invalid(
                "orchestrator.cleanup_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.orchestrator.finding_retention_secs == 0 {
            return Err(invalid(
                "orchestrator.finding_retention_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        // UTC-14:00 ~ UTC+14:00
        if self.parser.utc_offset_minutes.abs() > 14 * 60 {
            return Err(invalid(
                "parser.utc_offset_minutes",
                "must be within -840..=840".to_owned(),
            ));
        }
        if self.parser.max_line_length == 0 {
            return Err(invalid(
                "parser.max_line_length",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid(
                "metrics.port",
                "must be non-zero when metrics are enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> FleetwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/fleetwatch".to_owned(),
        }
    }
}

/// 메시지 버스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 서버 URL
    pub url: String,
    /// 연결 이름 (서버 모니터링에 표시)
    pub client_name: String,
    /// 연결 타임아웃 (초)
    pub connect_timeout_secs: u64,
    /// 최초 연결 및 재연결 최대 시도 횟수
    pub max_reconnect_attempts: u32,
    /// 백오프 시작 지연 (밀리초)
    pub reconnect_base_delay_ms: u64,
    /// 백오프 최대 지연 (밀리초)
    pub reconnect_max_delay_ms: u64,
    /// 구독별 수신 채널 용량
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_owned(),
            client_name: "fleetwatch".to_owned(),
            connect_timeout_secs: 5,
            max_reconnect_attempts: 10,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            channel_capacity: 1024,
        }
    }
}

/// 도메인 에이전트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// 에이전트 ID (비어 있으면 `<domain>-agent`)
    pub agent_id: String,
    /// 담당 도메인 (CLI `--domain`으로도 지정 가능)
    pub domain: String,
    /// 규칙 테이블 YAML 경로
    pub rules_path: String,
    /// 하트비트 주기 (초)
    pub heartbeat_interval_secs: u64,
    /// 유휴 키 정리 주기 (초)
    pub idle_sweep_interval_secs: u64,
    /// 엔진당 최대 추적 키 수
    pub max_tracked_keys: usize,
    /// 윈도우 기준 시각 (`processing`: 처리 시각, `event`: 로그 기록 시각)
    pub time_basis: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            domain: String::new(),
            rules_path: "/etc/fleetwatch/rules.yaml".to_owned(),
            heartbeat_interval_secs: 30,
            idle_sweep_interval_secs: 300,
            max_tracked_keys: 100_000,
            time_basis: "processing".to_owned(),
        }
    }
}

/// 오케스트레이터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 같은 finding key에 대한 알림 억제 시간 (초)
    pub notification_cooldown_secs: u64,
    /// 정리 작업 주기 (초)
    pub cleanup_interval_secs: u64,
    /// 메모리 내 Finding 보존 기간 (초)
    pub finding_retention_secs: u64,
    /// 에이전트 레지스트리 JSON 경로
    pub registry_path: String,
    /// Finding 저장 JSONL 경로
    pub findings_path: String,
    /// 시작 시 탐색 브로드캐스트 전송 여부
    pub discovery_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            notification_cooldown_secs: 3600,
            cleanup_interval_secs: 3600,
            finding_retention_secs: 86_400,
            registry_path: "/var/lib/fleetwatch/agents.json".to_owned(),
            findings_path: "/var/lib/fleetwatch/findings.jsonl".to_owned(),
            discovery_on_start: true,
        }
    }
}

/// 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 로그 타임스탬프의 UTC 오프셋 (분)
    pub utc_offset_minutes: i32,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            max_line_length: 64 * 1024, // 64KB
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_i32(target: &mut i32, env_key: &str) {
    override_parsed(target, env_key, "i32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}
