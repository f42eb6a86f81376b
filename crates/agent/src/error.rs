//! 에이전트 에러 타입
//!
//! [`AgentError`]는 에이전트 조립 단계의 에러를 표현합니다.
//! 실행 중 에러(버스, 상태 전환)는 core의 [`FleetwatchError`]를 그대로 사용합니다.

use fleetwatch_core::error::{ConfigError, FleetwatchError};

/// 에이전트 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// 빌더에 필수 구성 요소가 빠짐
    #[error("agent build error: {0}")]
    Build(String),

    /// 잘못된 에이전트 설정 값
    #[error("invalid agent config '{field}': {reason}")]
    Config {
        /// 설정 필드
        field: String,
        /// 사유
        reason: String,
    },
}

impl From<AgentError> for FleetwatchError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Build(reason) => FleetwatchError::Config(ConfigError::InvalidValue {
                field: "agent".to_owned(),
                reason,
            }),
            AgentError::Config { field, reason } => {
                FleetwatchError::Config(ConfigError::InvalidValue {
                    field: format!("agent.{field}"),
                    reason,
                })
            }
        }
    }
}
