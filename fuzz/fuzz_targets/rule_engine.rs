#![no_main]

use arbitrary::Arbitrary;
use chrono::{Duration, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

use fleetwatch_core::event::ParsedLogEvent;
use fleetwatch_detection::RuleEngine;
use fleetwatch_detection::rule::{CorrelationKeySpec, KeyValidation, PatternSpec, RuleDefinition};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 규칙 패턴 (최대 4개로 제한)
    patterns: Vec<FuzzPattern>,
    threshold: u8,
    window_secs: u16,
    cooldown_secs: u16,
    capture_key: bool,
    /// (초 단위 간격, 호스트명, 메시지)
    events: Vec<(u8, String, String)>,
}

#[derive(Arbitrary, Debug)]
enum FuzzPattern {
    Plain(String),
    Literal(String),
    Regex(String),
}

impl FuzzPattern {
    fn to_spec(&self) -> PatternSpec {
        match self {
            FuzzPattern::Plain(s) => PatternSpec::Plain(s.clone()),
            FuzzPattern::Literal(s) => PatternSpec::Literal { literal: s.clone() },
            FuzzPattern::Regex(s) => PatternSpec::Regex { regex: s.clone() },
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let patterns: Vec<PatternSpec> = input.patterns.iter().take(4).map(FuzzPattern::to_spec).collect();

    let mut rule = RuleDefinition::new("FuzzRule", patterns)
        .with_threshold(u32::from(input.threshold).max(1), u64::from(input.window_secs).max(1))
        .with_cooldown(u64::from(input.cooldown_secs));
    if input.capture_key {
        rule = rule.with_correlation_key(CorrelationKeySpec::capture("key", KeyValidation::Hostname));
    }

    let mut engine = RuleEngine::new("fuzz-agent");
    engine.load(vec![rule]);

    let Some(mut now) = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).single() else {
        return;
    };
    for (gap, hostname, message) in input.events.iter().take(64) {
        now += Duration::seconds(i64::from(*gap));
        let event = ParsedLogEvent::new(now, hostname.as_str(), "fuzz", message.as_str());
        // 같은 키에 대해 쿨다운 내 Finding은 최대 1개
        let findings = engine.evaluate_at(&event, now);
        assert!(findings.len() <= 1);
    }
    let _ = engine.sweep_idle_at(now + Duration::days(1));
});
