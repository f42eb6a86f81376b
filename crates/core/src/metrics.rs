//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `fleetwatch_`
//! - 구성요소: `ingest_`, `agent_`, `orchestrator_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(fleetwatch_core::metrics::AGENT_EVENTS_PROCESSED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 도메인 레이블 키 (wifi, security, ...)
pub const LABEL_DOMAIN: &str = "domain";

/// 규칙 레이블 키
pub const LABEL_RULE: &str = "rule";

/// 심각도 레이블 키
pub const LABEL_SEVERITY: &str = "severity";

// ─── Ingest 메트릭 ─────────────────────────────────────────────────

/// Ingest: 읽은 원시 라인 수 (counter)
pub const INGEST_LINES_READ_TOTAL: &str = "fleetwatch_ingest_lines_read_total";

/// Ingest: 파싱 성공 수 (counter)
pub const INGEST_LINES_PARSED_TOTAL: &str = "fleetwatch_ingest_lines_parsed_total";

/// Ingest: 파싱 실패 수 (counter)
pub const INGEST_PARSE_FAILURES_TOTAL: &str = "fleetwatch_ingest_parse_failures_total";

/// Ingest: 발행 성공 이벤트 수 (counter, label: domain)
pub const INGEST_EVENTS_PUBLISHED_TOTAL: &str = "fleetwatch_ingest_events_published_total";

/// Ingest: 발행 실패 수 (counter)
pub const INGEST_PUBLISH_FAILURES_TOTAL: &str = "fleetwatch_ingest_publish_failures_total";

// ─── Agent 메트릭 ──────────────────────────────────────────────────

/// Agent: 처리한 이벤트 수 (counter)
pub const AGENT_EVENTS_PROCESSED_TOTAL: &str = "fleetwatch_agent_events_processed_total";

/// Agent: 역직렬화 실패로 버린 메시지 수 (counter)
pub const AGENT_DESERIALIZE_FAILURES_TOTAL: &str = "fleetwatch_agent_deserialize_failures_total";

/// Agent: 규칙 패턴 매칭 수 (counter, label: rule)
pub const AGENT_RULE_MATCHES_TOTAL: &str = "fleetwatch_agent_rule_matches_total";

/// Agent: 발행한 Finding 수 (counter, label: rule)
pub const AGENT_FINDINGS_PUBLISHED_TOTAL: &str = "fleetwatch_agent_findings_published_total";

/// Agent: Finding 발행 실패 수 (counter)
pub const AGENT_PUBLISH_FAILURES_TOTAL: &str = "fleetwatch_agent_publish_failures_total";

/// Agent: 추적 중인 (규칙, 키) 상태 수 (gauge)
pub const AGENT_TRACKED_KEYS: &str = "fleetwatch_agent_tracked_keys";

// ─── Orchestrator 메트릭 ───────────────────────────────────────────

/// Orchestrator: 수신한 Finding 수 (counter, label: severity)
pub const ORCHESTRATOR_FINDINGS_RECEIVED_TOTAL: &str =
    "fleetwatch_orchestrator_findings_received_total";

/// Orchestrator: 하위 전달된 알림 수 (counter)
pub const ORCHESTRATOR_NOTIFICATIONS_SENT_TOTAL: &str =
    "fleetwatch_orchestrator_notifications_sent_total";

/// Orchestrator: 쿨다운으로 억제된 알림 수 (counter)
pub const ORCHESTRATOR_NOTIFICATIONS_SUPPRESSED_TOTAL: &str =
    "fleetwatch_orchestrator_notifications_suppressed_total";

/// Orchestrator: 저장 실패 수 (counter)
pub const ORCHESTRATOR_STORE_FAILURES_TOTAL: &str = "fleetwatch_orchestrator_store_failures_total";

/// Orchestrator: 역직렬화 실패 수 (counter)
pub const ORCHESTRATOR_DESERIALIZE_FAILURES_TOTAL: &str =
    "fleetwatch_orchestrator_deserialize_failures_total";

/// Orchestrator: 메모리 내 활성 Finding 수 (gauge)
pub const ORCHESTRATOR_ACTIVE_FINDINGS: &str = "fleetwatch_orchestrator_active_findings";

/// Orchestrator: 알려진 에이전트 수 (gauge)
pub const ORCHESTRATOR_KNOWN_AGENTS: &str = "fleetwatch_orchestrator_known_agents";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "fleetwatch_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, labels: version, role)
pub const DAEMON_BUILD_INFO: &str = "fleetwatch_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Ingest
    describe_counter!(INGEST_LINES_READ_TOTAL, "Total raw log lines read");
    describe_counter!(
        INGEST_LINES_PARSED_TOTAL,
        "Total log lines successfully parsed"
    );
    describe_counter!(
        INGEST_PARSE_FAILURES_TOTAL,
        "Total log lines dropped because they failed to parse"
    );
    describe_counter!(
        INGEST_EVENTS_PUBLISHED_TOTAL,
        "Total parsed events published to domain subjects"
    );
    describe_counter!(
        INGEST_PUBLISH_FAILURES_TOTAL,
        "Total parsed events that failed to publish"
    );

    // Agent
    describe_counter!(
        AGENT_EVENTS_PROCESSED_TOTAL,
        "Total domain events evaluated by the rule engine"
    );
    describe_counter!(
        AGENT_DESERIALIZE_FAILURES_TOTAL,
        "Total inbound messages dropped due to deserialization failure"
    );
    describe_counter!(
        AGENT_RULE_MATCHES_TOTAL,
        "Total rule pattern matches with a valid correlation key"
    );
    describe_counter!(
        AGENT_FINDINGS_PUBLISHED_TOTAL,
        "Total findings published by domain agents"
    );
    describe_counter!(
        AGENT_PUBLISH_FAILURES_TOTAL,
        "Total findings lost because publishing failed"
    );
    describe_gauge!(
        AGENT_TRACKED_KEYS,
        "Number of (rule, key) window states held by the rule engine"
    );

    // Orchestrator
    describe_counter!(
        ORCHESTRATOR_FINDINGS_RECEIVED_TOTAL,
        "Total findings received from all domains"
    );
    describe_counter!(
        ORCHESTRATOR_NOTIFICATIONS_SENT_TOTAL,
        "Total findings forwarded downstream after deduplication"
    );
    describe_counter!(
        ORCHESTRATOR_NOTIFICATIONS_SUPPRESSED_TOTAL,
        "Total notifications suppressed by the per-key cooldown"
    );
    describe_counter!(
        ORCHESTRATOR_STORE_FAILURES_TOTAL,
        "Total findings that could not be written to durable storage"
    );
    describe_counter!(
        ORCHESTRATOR_DESERIALIZE_FAILURES_TOTAL,
        "Total finding messages dropped due to deserialization failure"
    );
    describe_gauge!(
        ORCHESTRATOR_ACTIVE_FINDINGS,
        "Number of findings currently retained in memory"
    );
    describe_gauge!(
        ORCHESTRATOR_KNOWN_AGENTS,
        "Number of agents known to the orchestrator"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Fleetwatch process uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version/role labels)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        INGEST_LINES_READ_TOTAL,
        INGEST_LINES_PARSED_TOTAL,
        INGEST_PARSE_FAILURES_TOTAL,
        INGEST_EVENTS_PUBLISHED_TOTAL,
        INGEST_PUBLISH_FAILURES_TOTAL,
        AGENT_EVENTS_PROCESSED_TOTAL,
        AGENT_DESERIALIZE_FAILURES_TOTAL,
        AGENT_RULE_MATCHES_TOTAL,
        AGENT_FINDINGS_PUBLISHED_TOTAL,
        AGENT_PUBLISH_FAILURES_TOTAL,
        AGENT_TRACKED_KEYS,
        ORCHESTRATOR_FINDINGS_RECEIVED_TOTAL,
        ORCHESTRATOR_NOTIFICATIONS_SENT_TOTAL,
        ORCHESTRATOR_NOTIFICATIONS_SUPPRESSED_TOTAL,
        ORCHESTRATOR_STORE_FAILURES_TOTAL,
        ORCHESTRATOR_DESERIALIZE_FAILURES_TOTAL,
        ORCHESTRATOR_ACTIVE_FINDINGS,
        ORCHESTRATOR_KNOWN_AGENTS,
        DAEMON_UPTIME_SECONDS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_fleetwatch_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("fleetwatch_"),
                "Metric '{}' does not start with 'fleetwatch_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES.iter().filter(|n| n.contains("_total")) {
            assert!(name.ends_with("_total"), "'{}' misplaces _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }
}
