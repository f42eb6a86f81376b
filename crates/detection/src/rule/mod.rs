//! 탐지 규칙 엔진 -- 슬라이딩 윈도우 임계치와 키별 쿨다운
//!
//! 도메인 에이전트 하나가 [`RuleEngine`] 하나를 소유합니다.
//! 이벤트마다 모든 활성 규칙을 평가하고, (규칙, 상관 키)별로
//! 윈도우 안의 발생 횟수가 임계치에 도달하면 [`Finding`]을 만듭니다.
//!
//! # 평가 순서 (규칙마다)
//! 1. 패턴을 순서대로 시도해 첫 매칭만 사용
//! 2. 상관 키 추출 (실패하면 이 규칙은 건너뜀)
//! 3. 발생 기록 후 윈도우 밖 항목 제거
//! 4. `count >= occurrence_threshold`이고 쿨다운이 지났으면 Finding 생성
//!
//! # 아키텍처
//! - [`RuleEngine`]: 규칙 관리 및 평가 코디네이터
//! - [`loader`]: 도메인별 규칙 테이블 YAML 로딩
//! - [`matcher`]: 패턴 컴파일, 매칭, 상관 키 추출
//! - [`window`]: (규칙, 키)별 런타임 상태
//! - [`types`]: 규칙 데이터 구조 정의

pub mod loader;
pub mod matcher;
pub mod types;
pub mod window;

pub use loader::{RuleLoader, RuleTable, SkippedRule};
pub use matcher::{CompiledPattern, PatternKind, PatternMatch};
pub use types::{
    CaptureRef, CorrelationKeySpec, KeySource, KeyValidation, PatternSpec, RuleDefinition,
};
pub use window::{Occurrence, RuleRuntimeState};

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core::event::{Finding, ParsedLogEvent};
use fleetwatch_core::metrics as m;
use serde_json::{Map, Value};

/// 기본 최대 추적 키 수
const DEFAULT_MAX_TRACKED_KEYS: usize = 100_000;

/// 한도 초과 시 한 번에 비우는 비율 (한도의 1/N)
const EVICTION_BATCH_DIVISOR: usize = 10;

/// 윈도우 계산에 사용하는 시각
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeBasis {
    /// 처리 시각 (기본값)
    #[default]
    Processing,
    /// 로그에 기록된 시각 (파일 재생용)
    Event,
}

impl FromStr for TimeBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "event" => Ok(Self::Event),
            other => Err(format!("unknown time basis: '{other}'")),
        }
    }
}

/// 로딩된 규칙 (컴파일된 패턴 포함)
#[derive(Debug, Clone)]
pub struct CompiledRule {
    definition: RuleDefinition,
    patterns: Vec<CompiledPattern>,
    /// 컴파일에 실패해 빠진 패턴 (원본, 사유)
    failed_patterns: Vec<(String, String)>,
    disabled_reason: Option<String>,
}

impl CompiledRule {
    /// 규칙 정의를 컴파일합니다.
    ///
    /// 컴파일되지 않는 패턴은 경고와 함께 빠지고, 쓸 수 있는 패턴이
    /// 하나도 남지 않을 때만 규칙 전체가 비활성이 됩니다.
    pub fn compile(definition: RuleDefinition) -> Self {
        let mut disabled_reason = None;
        let mut patterns = Vec::with_capacity(definition.patterns.len());
        let mut failed_patterns = Vec::new();

        if let Err(e) = definition.validate() {
            disabled_reason = Some(e.to_string());
        } else if !definition.enabled {
            disabled_reason = Some("disabled in rule table".to_owned());
        } else if definition.patterns.is_empty() {
            disabled_reason = Some("rule has no patterns".to_owned());
        }

        for spec in &definition.patterns {
            match CompiledPattern::compile(spec, &definition.name) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => {
                    tracing::warn!(
                        rule = %definition.name,
                        pattern = spec.source(),
                        error = %e,
                        "pattern failed to compile, disabled"
                    );
                    failed_patterns.push((spec.source().to_owned(), e.to_string()));
                }
            }
        }

        if disabled_reason.is_none() && patterns.is_empty() {
            disabled_reason = Some(match failed_patterns.first() {
                Some((_, reason)) => format!("no usable patterns: {reason}"),
                None => "rule has no patterns".to_owned(),
            });
        }

        Self {
            definition,
            patterns,
            failed_patterns,
            disabled_reason,
        }
    }

    /// 규칙 이름
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// 원본 정의
    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    /// 컴파일된 패턴
    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// 컴파일에 실패해 빠진 패턴 (원본, 사유)
    pub fn failed_patterns(&self) -> &[(String, String)] {
        &self.failed_patterns
    }

    /// 평가 대상인지
    pub fn is_active(&self) -> bool {
        self.disabled_reason.is_none()
    }

    /// 비활성 사유
    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled_reason.as_deref()
    }

    fn first_match(&self, message: &str) -> Option<PatternMatch> {
        self.patterns.iter().find_map(|p| p.find(message))
    }
}

/// 규칙 로딩 결과 요약
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// 로딩된 규칙 수
    pub loaded: usize,
    /// 활성 규칙 수
    pub active: usize,
    /// 비활성 규칙 (이름, 사유)
    pub disabled: Vec<(String, String)>,
    /// 활성 규칙에서 빠진 패턴 (규칙 이름, 사유)
    pub disabled_patterns: Vec<(String, String)>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules loaded, {} active, {} disabled, {} patterns dropped",
            self.loaded,
            self.active,
            self.disabled.len(),
            self.disabled_patterns.len()
        )
    }
}

/// 규칙 엔진
///
/// # 사용 예시
/// ```ignore
/// let mut engine = RuleEngine::new("security-agent");
/// engine.load(table.rules_for(Domain::Security));
///
/// for finding in engine.process(&event) {
///     // findings.security로 발행
/// }
/// ```
pub struct RuleEngine {
    /// Finding의 `agent_name`
    agent_name: String,
    /// 로딩 순서대로의 규칙 목록
    rules: Vec<CompiledRule>,
    /// (규칙 인덱스, 상관 키) -> 런타임 상태
    states: HashMap<(usize, String), RuleRuntimeState>,
    /// 상태 최대 항목 수 (메모리 성장 제한)
    max_tracked_keys: usize,
    /// 윈도우 기준 시각
    time_basis: TimeBasis,
    /// 지금까지 평가에 사용한 가장 늦은 시각
    latest_seen: Option<DateTime<Utc>>,
}

impl RuleEngine {
    /// 규칙 없이 엔진을 생성합니다.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            rules: Vec::new(),
            states: HashMap::new(),
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            time_basis: TimeBasis::default(),
            latest_seen: None,
        }
    }

    /// 최대 추적 키 수를 설정합니다.
    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max.max(1);
        self
    }

    /// 윈도우 기준 시각을 설정합니다.
    pub fn with_time_basis(mut self, basis: TimeBasis) -> Self {
        self.time_basis = basis;
        self
    }

    /// 규칙 목록을 교체합니다. 기존 런타임 상태는 모두 버립니다.
    ///
    /// 잘못된 규칙은 로딩을 막지 않고 비활성으로 남깁니다.
    pub fn load(&mut self, definitions: Vec<RuleDefinition>) -> LoadReport {
        self.states.clear();
        self.rules = definitions.into_iter().map(CompiledRule::compile).collect();

        let mut report = LoadReport {
            loaded: self.rules.len(),
            ..LoadReport::default()
        };
        for rule in &self.rules {
            match rule.disabled_reason() {
                None => {
                    report.active += 1;
                    report.disabled_patterns.extend(
                        rule.failed_patterns()
                            .iter()
                            .map(|(_, reason)| (rule.name().to_owned(), reason.clone())),
                    );
                }
                Some(reason) => {
                    if rule.definition.enabled {
                        tracing::error!(
                            agent = %self.agent_name,
                            rule = %rule.name(),
                            reason,
                            "rule rejected and disabled"
                        );
                    } else {
                        tracing::info!(agent = %self.agent_name, rule = %rule.name(), "rule disabled");
                    }
                    report
                        .disabled
                        .push((rule.name().to_owned(), reason.to_owned()));
                }
            }
        }

        tracing::info!(agent = %self.agent_name, %report, "rules loaded");
        report
    }

    /// 로딩된 규칙
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// 로딩된 규칙 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 활성 규칙 수
    pub fn active_rule_count(&self) -> usize {
        self.rules.iter().filter(|r| r.is_active()).count()
    }

    /// 현재 추적 중인 (규칙, 키) 상태 수
    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    /// 규칙/키의 런타임 상태 (검사용)
    pub fn state(&self, rule: &str, key: &str) -> Option<&RuleRuntimeState> {
        let index = self.rules.iter().position(|r| r.name() == rule)?;
        self.states.get(&(index, key.to_owned()))
    }

    /// 설정된 기준 시각으로 이벤트를 평가합니다.
    pub fn process(&mut self, event: &ParsedLogEvent) -> Vec<Finding> {
        let now = match self.time_basis {
            TimeBasis::Processing => Utc::now(),
            TimeBasis::Event => event.original_ts,
        };
        self.evaluate_at(event, now)
    }

    /// 주어진 시각을 "현재"로 하여 이벤트를 평가합니다.
    ///
    /// 한 이벤트가 여러 규칙에 걸리면 규칙마다 Finding이 생길 수 있습니다.
    pub fn evaluate_at(&mut self, event: &ParsedLogEvent, now: DateTime<Utc>) -> Vec<Finding> {
        let mut findings = Vec::new();
        self.latest_seen = Some(self.latest_seen.map_or(now, |seen| seen.max(now)));

        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.is_active() {
                continue;
            }
            let Some(matched) = rule.first_match(&event.message) else {
                continue;
            };
            let definition = &rule.definition;
            let Some(key) = matcher::extract_key(&definition.correlation_key, event, &matched)
            else {
                tracing::trace!(rule = %definition.name, event_id = %event.event_id, "no correlation key, skipping");
                continue;
            };

            metrics::counter!(m::AGENT_RULE_MATCHES_TOTAL, m::LABEL_RULE => definition.name.clone())
                .increment(1);

            let state_key = (index, key);
            if !self.states.contains_key(&state_key) && self.states.len() >= self.max_tracked_keys
            {
                make_room(&mut self.states, &self.rules, self.max_tracked_keys, now);
            }

            let window = seconds(definition.time_window_seconds);
            let cooldown = seconds(definition.finding_cooldown_seconds);
            let state = self
                .states
                .entry(state_key.clone())
                .or_insert_with(|| RuleRuntimeState::new(now));

            state.record(Occurrence {
                at: now,
                matched_text: matched.matched_text.clone(),
                event_id: event.event_id.clone(),
            });
            state.evict(now, window);

            let threshold = usize::try_from(definition.occurrence_threshold).unwrap_or(usize::MAX);
            if state.count() >= threshold && state.cooldown_elapsed(now, cooldown) {
                state.mark_finding(now);
                let finding =
                    build_finding(&self.agent_name, definition, event, &state_key.1, &matched, state, now);
                tracing::debug!(
                    rule = %definition.name,
                    key = %state_key.1,
                    count = state.count(),
                    "finding generated"
                );
                findings.push(finding);
            }
        }

        findings
    }

    /// 윈도우가 비었고 쿨다운도 지난 상태를 제거합니다.
    ///
    /// 제거한 항목 수를 반환합니다.
    pub fn sweep_idle_at(&mut self, now: DateTime<Utc>) -> usize {
        sweep_idle(&mut self.states, &self.rules, now)
    }

    /// 설정된 기준 시각으로 유휴 상태를 제거합니다.
    ///
    /// `Event` 기준이면 지금까지 본 가장 늦은 로그 시각을 "현재"로 봅니다.
    pub fn sweep_idle(&mut self) -> usize {
        let now = match self.time_basis {
            TimeBasis::Processing => Utc::now(),
            TimeBasis::Event => match self.latest_seen {
                Some(seen) => seen,
                None => return 0,
            },
        };
        self.sweep_idle_at(now)
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn sweep_idle(
    states: &mut HashMap<(usize, String), RuleRuntimeState>,
    rules: &[CompiledRule],
    now: DateTime<Utc>,
) -> usize {
    let before = states.len();
    states.retain(|(index, _), state| {
        let Some(rule) = rules.get(*index) else {
            return false;
        };
        let window = seconds(rule.definition.time_window_seconds);
        let cooldown = seconds(rule.definition.finding_cooldown_seconds);
        !state.is_idle(now, window, cooldown)
    });
    before - states.len()
}

/// 새 키를 넣을 자리를 만듭니다.
///
/// 유휴 상태를 먼저 정리하고, 그래도 부족하면 가장 오래 갱신되지 않은 상태를
/// 한도의 1/[`EVICTION_BATCH_DIVISOR`]만큼 한꺼번에 버립니다.
/// 호출 후에는 최소 한 배치만큼 빈자리가 있으므로 다음 호출까지 새 키를 그만큼 받을 수 있습니다.
fn make_room(
    states: &mut HashMap<(usize, String), RuleRuntimeState>,
    rules: &[CompiledRule],
    max: usize,
    now: DateTime<Utc>,
) {
    let batch = (max / EVICTION_BATCH_DIVISOR).max(1);
    let target = max.saturating_sub(batch);

    let swept = sweep_idle(states, rules, now);
    if states.len() <= target {
        tracing::debug!(swept, "idle rule states swept to make room");
        return;
    }

    let evict = states.len() - target;
    let mut by_age: Vec<(DateTime<Utc>, (usize, String))> = states
        .iter()
        .map(|(k, s)| (s.last_touched(), k.clone()))
        .collect();
    if evict < by_age.len() {
        by_age.select_nth_unstable_by_key(evict, |(touched, _)| *touched);
    }

    for (_, key) in by_age.into_iter().take(evict) {
        states.remove(&key);
    }
    tracing::warn!(
        max_tracked_keys = max,
        swept,
        dropped = evict,
        "rule state limit reached, dropped least recently used keys"
    );
}

fn build_finding(
    agent_name: &str,
    rule: &RuleDefinition,
    event: &ParsedLogEvent,
    key: &str,
    matched: &PatternMatch,
    state: &RuleRuntimeState,
    now: DateTime<Utc>,
) -> Finding {
    let count = state.count();
    let matched_texts: Vec<Value> = state
        .occurrences()
        .map(|o| Value::String(o.matched_text.clone()))
        .collect();
    let event_ids: Vec<String> = state.occurrences().map(|o| o.event_id.clone()).collect();

    let mut details = Map::new();
    details.insert("rule".to_owned(), Value::from(rule.name.clone()));
    details.insert("matched_text".to_owned(), Value::Array(matched_texts));
    details.insert(
        "event_ids".to_owned(),
        Value::Array(event_ids.iter().cloned().map(Value::String).collect()),
    );
    details.insert(rule.key_field().to_owned(), Value::from(key));
    details.insert(rule.count_field().to_owned(), Value::from(count));
    details.insert(
        "time_window_seconds".to_owned(),
        Value::from(rule.time_window_seconds),
    );
    details.insert(
        "occurrence_threshold".to_owned(),
        Value::from(rule.occurrence_threshold),
    );
    details.insert(
        "process_name".to_owned(),
        Value::from(event.process_name.clone()),
    );
    for (name, value) in &matched.named {
        details
            .entry(name.clone())
            .or_insert_with(|| Value::from(value.clone()));
    }

    let description = render_description(rule, key, count, &event.hostname);
    let mut finding = Finding::new(agent_name, rule.name.clone(), rule.severity, description, now);
    finding.device_hostname = (!event.hostname.is_empty()).then(|| event.hostname.clone());
    finding.device_ip = event
        .source_ip
        .map(|ip| ip.to_string())
        .or_else(|| key.parse::<IpAddr>().ok().map(|ip| ip.to_string()));
    finding.details = details;
    finding.evidence_event_ids = event_ids;
    finding
}

fn render_description(rule: &RuleDefinition, key: &str, count: usize, hostname: &str) -> String {
    if rule.description.is_empty() {
        return format!(
            "{}: {count} occurrence(s) for {key} within {}s",
            rule.name, rule.time_window_seconds
        );
    }
    rule.description
        .replace("{key}", key)
        .replace("{count}", &count.to_string())
        .replace("{rule}", &rule.name)
        .replace("{hostname}", hostname)
        .replace("{window}", &rule.time_window_seconds.to_string())
}
