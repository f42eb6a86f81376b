//! 오케스트레이터 에러 타입
//!
//! `From<OrchestratorError> for FleetwatchError` 변환으로 상위 레이어에서 `?`로 전파합니다.

use fleetwatch_core::error::{ConfigError, FleetwatchError, StorageError};

/// 오케스트레이터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// 에이전트 레지스트리 읽기/쓰기 실패
    #[error("agent registry error: {path}: {reason}")]
    Registry {
        /// 레지스트리 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// Finding 저장 실패
    #[error("finding store error: {path}: {reason}")]
    Store {
        /// 저장 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 빌더 설정 오류
    #[error("orchestrator build error: {0}")]
    Build(String),
}

impl From<OrchestratorError> for FleetwatchError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Registry { path, reason } => {
                FleetwatchError::Storage(StorageError::Corrupt { path, reason })
            }
            OrchestratorError::Store { path, reason } => {
                FleetwatchError::Storage(StorageError::Write { path, reason })
            }
            OrchestratorError::Build(reason) => {
                FleetwatchError::Config(ConfigError::InvalidValue {
                    field: "orchestrator".to_owned(),
                    reason,
                })
            }
        }
    }
}
