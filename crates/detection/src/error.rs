//! 탐지 크레이트 에러 타입
//!
//! [`DetectionError`]는 파싱, 규칙 로딩, 수집 단계에서 발생하는 에러를 표현합니다.
//! `From<DetectionError> for FleetwatchError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use fleetwatch_core::error::{self as core_error, FleetwatchError};

/// 탐지 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// 로그 라인 파싱 실패
    #[error("parse error at offset {offset}: {reason}")]
    Parse {
        /// 실패 위치 (바이트 오프셋)
        offset: usize,
        /// 실패 사유
        reason: String,
    },

    /// 입력 라인이 최대 길이를 초과
    #[error("line too large: {size} bytes (max: {max})")]
    TooLarge {
        /// 입력 크기
        size: usize,
        /// 허용 최대 크기
        max: usize,
    },

    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule '{rule}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 이름
        rule: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 수집기 에러 (파일 I/O, 네트워크 등)
    #[error("collector error: {source_type}: {reason}")]
    Collector {
        /// 수집 소스 유형 (file, syslog_udp)
        source_type: String,
        /// 에러 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DetectionError> for FleetwatchError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Parse { offset, reason } => {
                FleetwatchError::Parse(core_error::ParseError::Failed { offset, reason })
            }
            DetectionError::TooLarge { size, max } => {
                FleetwatchError::Parse(core_error::ParseError::TooLarge { size, max })
            }
            DetectionError::RuleLoad { path, reason } => {
                FleetwatchError::Detection(core_error::DetectionError::RuleLoad { path, reason })
            }
            DetectionError::Io(e) => FleetwatchError::Io(e),
            other => FleetwatchError::Detection(core_error::DetectionError::Rule(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = DetectionError::Parse {
            offset: 42,
            reason: "unexpected character".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("unexpected character"));
    }

    #[test]
    fn parse_error_converts_to_core_parse() {
        let err: FleetwatchError = DetectionError::Parse {
            offset: 0,
            reason: "empty input".to_owned(),
        }
        .into();
        assert!(matches!(err, FleetwatchError::Parse(_)));
    }

    #[test]
    fn rule_validation_converts_to_detection() {
        let err: FleetwatchError = DetectionError::RuleValidation {
            rule: "Broken".to_owned(),
            reason: "no patterns".to_owned(),
        }
        .into();
        assert!(matches!(err, FleetwatchError::Detection(_)));
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn collector_error_display() {
        let err = DetectionError::Collector {
            source_type: "syslog_udp".to_owned(),
            reason: "address in use".to_owned(),
        };
        assert!(err.to_string().contains("syslog_udp"));
    }
}
