//! 주제(subject) 이름과 와일드카드 매칭
//!
//! 주제는 점(`.`)으로 구분된 토큰 열입니다.
//! - `*`: 정확히 한 토큰과 매칭
//! - `>`: 마지막 위치에서 하나 이상의 나머지 토큰과 매칭

use crate::types::Domain;

/// 모든 도메인의 Finding (오케스트레이터 전용 구독)
pub const FINDINGS_ALL: &str = "findings.>";
/// 탐색 브로드캐스트
pub const DISCOVERY_BROADCAST: &str = "agent.discovery.broadcast";
/// 탐색 응답
pub const DISCOVERY_RESPONSE: &str = "agent.discovery.response";
/// 모든 에이전트 하트비트
pub const HEARTBEAT_ALL: &str = "agent.heartbeat.>";
/// 중복 제거 후 하위 소비자에게 전달되는 Finding
pub const NOTIFICATIONS: &str = "notifications.findings";

/// `logs.<domain>`
pub fn logs_subject(domain: Domain) -> String {
    format!("logs.{domain}")
}

/// `findings.<domain>`
pub fn findings_subject(domain: Domain) -> String {
    format!("findings.{domain}")
}

/// `agent.heartbeat.<domain>`
pub fn heartbeat_subject(domain: Domain) -> String {
    format!("agent.heartbeat.{domain}")
}

/// 구독 패턴이 주제와 매칭되는지 확인합니다.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(token)) => {
                return !token.is_empty() && pattern_tokens.next().is_none();
            }
            (Some("*"), Some(token)) => {
                if token.is_empty() {
                    return false;
                }
            }
            (Some(p), Some(s)) => {
                if p.is_empty() || p != s {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(subject_matches("logs.wifi", "logs.wifi"));
        assert!(!subject_matches("logs.wifi", "logs.security"));
        assert!(!subject_matches("logs.wifi", "logs.wifi.extra"));
    }

    #[test]
    fn full_wildcard_matches_one_or_more_tokens() {
        assert!(subject_matches("findings.>", "findings.security"));
        assert!(subject_matches("findings.>", "findings.security.extra"));
        assert!(!subject_matches("findings.>", "findings"));
        assert!(!subject_matches("findings.>", "logs.security"));
    }

    #[test]
    fn full_wildcard_must_be_last() {
        assert!(!subject_matches("findings.>.x", "findings.a.x"));
    }

    #[test]
    fn single_token_wildcard() {
        assert!(subject_matches("agent.*.broadcast", "agent.discovery.broadcast"));
        assert!(!subject_matches("agent.*", "agent.discovery.broadcast"));
    }

    #[test]
    fn empty_tokens_never_match() {
        assert!(!subject_matches("logs..wifi", "logs..wifi"));
        assert!(!subject_matches("logs.*", "logs."));
    }

    #[test]
    fn domain_subjects() {
        assert_eq!(logs_subject(Domain::Wifi), "logs.wifi");
        assert_eq!(findings_subject(Domain::Storage), "findings.storage");
        assert_eq!(heartbeat_subject(Domain::System), "agent.heartbeat.system");
        assert!(subject_matches(FINDINGS_ALL, &findings_subject(Domain::General)));
        assert!(subject_matches(HEARTBEAT_ALL, &heartbeat_subject(Domain::Health)));
    }
}
