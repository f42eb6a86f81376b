//! 패턴 매칭과 상관 키 추출
//!
//! 패턴은 규칙 로딩 시 한 번만 컴파일합니다.
//! 리터럴 패턴도 이스케이프된 `(?i)` 정규식으로 컴파일해
//! 매칭 구간을 원문 그대로 돌려줍니다.

use std::collections::BTreeMap;
use std::net::IpAddr;

use fleetwatch_core::event::ParsedLogEvent;
use regex::Regex;

use super::types::{CaptureRef, CorrelationKeySpec, KeySource, PatternSpec};
use crate::error::DetectionError;

/// 정규식으로 간주하는 메타 문자
///
/// `.`은 빠져 있습니다. 인터페이스 이름(`eth0.1`)이나 버전 문자열에 흔해서
/// `.`만 있는 문자열은 리터럴로 봅니다.
const REGEX_METACHARACTERS: &[char] = &[
    '\\', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// 패턴 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// 대소문자 무시 부분 문자열
    Literal,
    /// 대소문자 구분 정규식
    Regex,
}

/// 컴파일된 패턴
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    kind: PatternKind,
    source: String,
    regex: Regex,
}

/// 한 번의 패턴 매칭 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// 매칭된 원문 구간
    pub matched_text: String,
    /// 번호별 캡처 (0은 전체 매칭, 참여하지 않은 그룹은 None)
    pub groups: Vec<Option<String>>,
    /// 이름 있는 캡처
    pub named: BTreeMap<String, String>,
    /// 매칭한 패턴 종류
    pub kind: PatternKind,
}

impl CompiledPattern {
    /// 패턴을 컴파일합니다.
    ///
    /// 메타 문자가 없는 문자열은 리터럴, 있으면 정규식으로 취급합니다.
    pub fn compile(spec: &PatternSpec, rule: &str) -> Result<Self, DetectionError> {
        let (kind, source) = match spec {
            PatternSpec::Plain(s) if s.contains(REGEX_METACHARACTERS) => (PatternKind::Regex, s),
            PatternSpec::Plain(s) => (PatternKind::Literal, s),
            PatternSpec::Literal { literal } => (PatternKind::Literal, literal),
            PatternSpec::Regex { regex } => (PatternKind::Regex, regex),
        };

        if source.is_empty() {
            return Err(DetectionError::RuleValidation {
                rule: rule.to_owned(),
                reason: "pattern must not be empty".to_owned(),
            });
        }

        let compiled = match kind {
            PatternKind::Literal => Regex::new(&format!("(?i){}", regex::escape(source))),
            PatternKind::Regex => Regex::new(source),
        }
        .map_err(|e| DetectionError::RuleValidation {
            rule: rule.to_owned(),
            reason: format!("invalid regex '{source}': {e}"),
        })?;

        Ok(Self {
            kind,
            source: source.clone(),
            regex: compiled,
        })
    }

    /// 패턴 종류
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// 원본 패턴 문자열
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 메시지에 대해 매칭을 시도합니다.
    pub fn find(&self, message: &str) -> Option<PatternMatch> {
        let captures = self.regex.captures(message)?;
        let matched_text = captures.get(0)?.as_str().to_owned();

        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_owned()))
            .collect();

        let named = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect();

        Some(PatternMatch {
            matched_text,
            groups,
            named,
            kind: self.kind,
        })
    }
}

/// 상관 키를 추출합니다.
///
/// 필요한 값이 없거나 검증에 실패하면 `None`을 반환하고,
/// 호출자는 해당 규칙을 이 이벤트에 대해 건너뜁니다.
pub fn extract_key(
    spec: &CorrelationKeySpec,
    event: &ParsedLogEvent,
    matched: &PatternMatch,
) -> Option<String> {
    match spec {
        CorrelationKeySpec::Field(source) => field_key(*source, event),
        CorrelationKeySpec::Capture { .. } if matched.kind == PatternKind::Literal => {
            field_key(KeySource::Hostname, event)
        }
        CorrelationKeySpec::Capture { capture, validate } => {
            let value = match capture {
                CaptureRef::Index(index) => matched.groups.get(*index)?.clone()?,
                CaptureRef::Name(name) => matched.named.get(name)?.clone(),
            };
            validate.accepts(&value).then_some(value)
        }
    }
}

fn field_key(source: KeySource, event: &ParsedLogEvent) -> Option<String> {
    let value = match source {
        KeySource::Hostname => event.hostname.clone(),
        KeySource::SourceIp => event.source_ip.map(|ip: IpAddr| ip.to_string())?,
        KeySource::Process => event.process_name.clone(),
    };
    (!value.is_empty()).then_some(value)
}
