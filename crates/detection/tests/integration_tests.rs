//! 통합 테스트 -- 파싱부터 Finding 생성까지의 흐름 검증

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use fleetwatch_core::types::{Domain, Severity};
use fleetwatch_detection::{LogParser, RuleEngine, RuleLoader};

fn default_rules_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../rules/default.yaml")
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap() + Duration::seconds(secs)
}

fn ssh_failure(second: u32) -> String {
    format!(
        "<38>Mar 15 10:00:{second:02} gw-01 sshd[812]: Failed password for root from 10.0.0.5 port 5{second:04} ssh2"
    )
}

async fn security_engine() -> RuleEngine {
    let table = RuleLoader::load_path(default_rules_path()).await.unwrap();
    let mut engine = RuleEngine::new("security-agent");
    let report = engine.load(table.rules_for(Domain::Security));
    assert!(report.disabled.is_empty(), "{:?}", report.disabled);
    engine
}

#[tokio::test]
async fn default_rule_table_loads_cleanly() {
    let table = RuleLoader::load_path(default_rules_path()).await.unwrap();
    assert!(table.skipped().is_empty(), "{:?}", table.skipped());

    for domain in Domain::ALL {
        let mut engine = RuleEngine::new(format!("{domain}-agent"));
        let report = engine.load(table.rules_for(domain));
        assert!(
            report.disabled.is_empty(),
            "domain {domain}: {:?}",
            report.disabled
        );
    }
    assert!(!table.rules_for(Domain::Security).is_empty());
}

#[tokio::test]
async fn ssh_burst_produces_single_finding_then_cooldown() {
    let parser = LogParser::new();
    let mut engine = security_engine().await;

    // 10초 안에 같은 IP에서 5번 실패
    let mut findings = Vec::new();
    for (i, second) in [0u32, 2, 4, 6, 8].into_iter().enumerate() {
        let (event, domain) = parser.parse_line(&ssh_failure(second), 2024).unwrap();
        assert_eq!(domain, Domain::Security);
        findings.extend(engine.evaluate_at(&event, t(i64::from(second))));
        if i < 4 {
            assert!(findings.is_empty());
        }
    }
    assert_eq!(findings.len(), 1);

    let finding = &findings[0];
    assert_eq!(finding.finding_type, "RepeatedSSHLoginFailure");
    assert_eq!(finding.agent_name, "security-agent");
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.details["source_ip"], Value::from("10.0.0.5"));
    assert_eq!(finding.details["failure_count"], Value::from(5));
    assert_eq!(finding.evidence_event_ids.len(), 5);
    assert_eq!(finding.resource_id(), "gw-01");
    assert_eq!(finding.finding_key(), "RepeatedSSHLoginFailure:gw-01");

    // 5초 뒤 6번째 실패는 쿨다운으로 억제
    let (event, _) = parser.parse_line(&ssh_failure(13), 2024).unwrap();
    assert!(engine.evaluate_at(&event, t(13)).is_empty());

    // 601초 뒤 새 버스트는 두 번째 Finding
    let base = 8 + 601;
    let mut second = Vec::new();
    for offset in 0..5 {
        let (event, _) = parser.parse_line(&ssh_failure(offset), 2024).unwrap();
        second.extend(engine.evaluate_at(&event, t(base + i64::from(offset))));
    }
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].details["failure_count"], Value::from(5));
}

#[tokio::test]
async fn failures_spread_beyond_window_never_fire() {
    let parser = LogParser::new();
    let mut engine = security_engine().await;

    // 4번 실패, 창(120초)보다 긴 휴지, 1번 더
    for second in 0..4 {
        let (event, _) = parser.parse_line(&ssh_failure(second), 2024).unwrap();
        assert!(engine.evaluate_at(&event, t(i64::from(second))).is_empty());
    }
    let (event, _) = parser.parse_line(&ssh_failure(30), 2024).unwrap();
    assert!(engine.evaluate_at(&event, t(200)).is_empty());
}

#[tokio::test]
async fn different_source_ips_are_counted_separately() {
    let parser = LogParser::new();
    let mut engine = security_engine().await;

    for i in 0..8u32 {
        let ip = if i % 2 == 0 { "10.0.0.5" } else { "10.0.0.6" };
        let line = format!(
            "<38>Mar 15 10:00:0{i} gw-01 sshd[1]: Failed password for admin from {ip} port 22 ssh2"
        );
        let (event, _) = parser.parse_line(&line, 2024).unwrap();
        assert!(engine.evaluate_at(&event, t(i64::from(i))).is_empty());
    }
    assert_eq!(engine.tracked_keys(), 2);
}

#[tokio::test]
async fn unrelated_lines_do_not_create_state() {
    let parser = LogParser::new();
    let mut engine = security_engine().await;
    let (event, _) = parser
        .parse_line(
            "<38>Mar 15 10:00:00 gw-01 sshd[1]: Accepted publickey for ops from 10.0.0.9 port 22 ssh2",
            2024,
        )
        .unwrap();
    assert!(engine.evaluate_at(&event, t(0)).is_empty());
    assert_eq!(engine.tracked_keys(), 0);
}

mod proptests {
    use super::*;
    use fleetwatch_detection::rule::RuleDefinition;
    use proptest::prelude::*;

    proptest! {
        /// 같은 이벤트 열을 두 엔진에 넣으면 같은 Finding 열이 나온다
        #[test]
        fn evaluation_is_deterministic(
            gaps in proptest::collection::vec(0i64..90, 1..40),
            hosts in proptest::collection::vec(0usize..3, 1..40),
        ) {
            let rule = RuleDefinition::new("Flap", vec!["link down".into()])
                .with_threshold(3, 60)
                .with_cooldown(120);
            let mut a = RuleEngine::new("agent");
            let mut b = RuleEngine::new("agent");
            a.load(vec![rule.clone()]);
            b.load(vec![rule]);

            let mut now = 0i64;
            for (gap, host) in gaps.iter().zip(hosts.iter().cycle()) {
                now += gap;
                let event = fleetwatch_core::event::ParsedLogEvent::new(
                    t(now),
                    format!("sw-{host}"),
                    "netifd",
                    "eth0 link down",
                );
                let fa: Vec<_> = a.evaluate_at(&event, t(now)).into_iter().map(|f| (f.finding_key(), f.timestamp)).collect();
                let fb: Vec<_> = b.evaluate_at(&event, t(now)).into_iter().map(|f| (f.finding_key(), f.timestamp)).collect();
                prop_assert_eq!(fa, fb);
            }
        }

        /// 한 키에서 나온 Finding 사이의 간격은 항상 쿨다운보다 길다
        #[test]
        fn findings_respect_cooldown(gaps in proptest::collection::vec(0i64..30, 1..80)) {
            let rule = RuleDefinition::new("Flap", vec!["link down".into()])
                .with_threshold(2, 60)
                .with_cooldown(100);
            let mut engine = RuleEngine::new("agent");
            engine.load(vec![rule]);

            let mut now = 0i64;
            let mut last: Option<i64> = None;
            for gap in gaps {
                now += gap;
                let event = fleetwatch_core::event::ParsedLogEvent::new(t(now), "sw", "netifd", "link down");
                if !engine.evaluate_at(&event, t(now)).is_empty() {
                    if let Some(prev) = last {
                        prop_assert!(now - prev > 100);
                    }
                    last = Some(now);
                }
            }
        }
    }
}
