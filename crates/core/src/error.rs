//! 에러 타입: 도메인별 에러 정의

/// Fleetwatch 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FleetwatchError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 메시지 버스 에러
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// 에이전트/오케스트레이터 생명주기 에러
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// 탐지 엔진 에러
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 직렬화/역직렬화 에러
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 메시지 버스 에러
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// 연결 실패 (재시도 한도 소진 포함)
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    Connect { attempts: u32, reason: String },

    /// 발행 실패
    #[error("publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    /// 구독 실패
    #[error("subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    /// 연결 종료 실패 (drain 중 에러)
    #[error("closing bus connection failed: {reason}")]
    Close { reason: String },

    /// 이미 닫힌 버스
    #[error("bus is closed")]
    Closed,
}

/// 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// 허용되지 않는 상태 전이
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,

    /// 버스 연결을 완전히 잃음
    #[error("bus connection lost")]
    ConnectionLost,

    /// 백그라운드 태스크가 비정상 종료됨
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

/// 탐지 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// 탐지 규칙 에러
    #[error("rule error: {0}")]
    Rule(String),

    /// 규칙 파일 로드 실패
    #[error("rule load failed for '{path}': {reason}")]
    RuleLoad { path: String, reason: String },
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 지원하지 않는 형식
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 기록 실패
    #[error("write to '{path}' failed: {reason}")]
    Write { path: String, reason: String },

    /// 읽기 실패
    #[error("read from '{path}' failed: {reason}")]
    Read { path: String, reason: String },

    /// 저장된 데이터 형식 오류
    #[error("corrupt data in '{path}': {reason}")]
    Corrupt { path: String, reason: String },
}
