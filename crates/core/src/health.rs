//! 상태 보고 타입과 dyn 호환 Future 별칭

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// `dyn` trait 메서드에서 반환하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 컴포넌트 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 두 상태 중 더 나쁜 쪽을 반환합니다.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        match (&self, &other) {
            (Self::Unhealthy(_), _) => self,
            (_, Self::Unhealthy(_)) => other,
            (Self::Degraded(_), _) => self,
            (_, Self::Degraded(_)) => other,
            _ => self,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_unhealthy() {
        let status = HealthStatus::Degraded("slow".to_owned())
            .worst(HealthStatus::Unhealthy("down".to_owned()));
        assert_eq!(status, HealthStatus::Unhealthy("down".to_owned()));
    }

    #[test]
    fn worst_of_healthy_pair_is_healthy() {
        assert!(HealthStatus::Healthy.worst(HealthStatus::Healthy).is_healthy());
    }

    #[test]
    fn display_includes_reason() {
        assert_eq!(
            HealthStatus::Degraded("reconnecting".to_owned()).to_string(),
            "degraded: reconnecting"
        );
    }
}
