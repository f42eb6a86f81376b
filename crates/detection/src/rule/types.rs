//! 탐지 규칙 데이터 타입
//!
//! 규칙 테이블 YAML에서 역직렬화되는 구조체들을 정의합니다.

use fleetwatch_core::types::Severity;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DetectionError;

/// 규칙 이름 최대 길이
const MAX_RULE_NAME_LEN: usize = 256;

/// 기본 Finding 쿨다운 (초)
pub const DEFAULT_FINDING_COOLDOWN_SECS: u64 = 600;

/// 기본 키 필드 이름 (details)
pub const DEFAULT_KEY_FIELD: &str = "correlation_key";

/// 기본 횟수 필드 이름 (details)
pub const DEFAULT_COUNT_FIELD: &str = "occurrence_count";

/// 탐지 규칙 -- 규칙 테이블의 한 항목에 대응합니다.
///
/// # YAML 스키마
/// ```yaml
/// security:
///   RepeatedSSHLoginFailure:
///     patterns:
///       - 'Failed password for .* from (?P<ip>\d{1,3}(?:\.\d{1,3}){3})'
///       - literal: "Bad password attempt"
///     occurrence_threshold: 5
///     time_window_seconds: 120
///     finding_cooldown_seconds: 600
///     severity: High
///     description: "{count} failed logins from {key}"
///     correlation_key:
///       capture: ip
///       validate: ipv4
///     key_field: source_ip
///     count_field: failure_count
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// 규칙 이름 (테이블 키에서 채워짐, Finding의 `finding_type`)
    #[serde(default)]
    pub name: String,
    /// 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 매칭 패턴 (순서대로 시도, 첫 매칭만 사용)
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
    /// 윈도우 내 최소 발생 횟수
    #[serde(default = "default_threshold")]
    pub occurrence_threshold: u32,
    /// 슬라이딩 윈도우 길이 (초)
    #[serde(default = "default_time_window")]
    pub time_window_seconds: u64,
    /// 같은 키에 대한 Finding 최소 간격 (초)
    #[serde(default = "default_cooldown")]
    pub finding_cooldown_seconds: u64,
    /// Finding 심각도
    #[serde(default, deserialize_with = "deserialize_severity")]
    pub severity: Severity,
    /// 설명 템플릿 (`{key}`, `{count}`, `{rule}`, `{hostname}`, `{window}`)
    #[serde(default)]
    pub description: String,
    /// 상관 키 추출 방식
    #[serde(default)]
    pub correlation_key: CorrelationKeySpec,
    /// details에 키를 기록할 필드 이름
    #[serde(default)]
    pub key_field: Option<String>,
    /// details에 횟수를 기록할 필드 이름
    #[serde(default)]
    pub count_field: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> u32 {
    1
}

fn default_time_window() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    DEFAULT_FINDING_COOLDOWN_SECS
}

fn deserialize_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Severity::from_str_loose(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown severity: '{raw}'")))
}

impl RuleDefinition {
    /// 기본값으로 규칙을 생성합니다 (테스트와 코드 구성용).
    pub fn new(name: impl Into<String>, patterns: Vec<PatternSpec>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            patterns,
            occurrence_threshold: default_threshold(),
            time_window_seconds: default_time_window(),
            finding_cooldown_seconds: default_cooldown(),
            severity: Severity::default(),
            description: String::new(),
            correlation_key: CorrelationKeySpec::default(),
            key_field: None,
            count_field: None,
        }
    }

    /// 임계치와 윈도우를 설정합니다.
    pub fn with_threshold(mut self, occurrences: u32, window_secs: u64) -> Self {
        self.occurrence_threshold = occurrences;
        self.time_window_seconds = window_secs;
        self
    }

    /// 쿨다운을 설정합니다.
    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.finding_cooldown_seconds = secs;
        self
    }

    /// 심각도를 설정합니다.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// 상관 키 추출 방식을 설정합니다.
    pub fn with_correlation_key(mut self, spec: CorrelationKeySpec) -> Self {
        self.correlation_key = spec;
        self
    }

    /// details 필드 이름을 설정합니다.
    pub fn with_fields(mut self, key_field: impl Into<String>, count_field: impl Into<String>) -> Self {
        self.key_field = Some(key_field.into());
        self.count_field = Some(count_field.into());
        self
    }

    /// 설명 템플릿을 설정합니다.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// details에 키를 기록할 필드 이름
    pub fn key_field(&self) -> &str {
        self.key_field.as_deref().unwrap_or(DEFAULT_KEY_FIELD)
    }

    /// details에 횟수를 기록할 필드 이름
    pub fn count_field(&self) -> &str {
        self.count_field.as_deref().unwrap_or(DEFAULT_COUNT_FIELD)
    }

    /// 구조적 유효성을 검증합니다.
    ///
    /// 패턴 컴파일은 여기서 하지 않습니다 (엔진 로딩 시 패턴별로 판정).
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.name.is_empty() {
            return Err(DetectionError::RuleValidation {
                rule: "(empty)".to_owned(),
                reason: "rule name must not be empty".to_owned(),
            });
        }

        if self.name.len() > MAX_RULE_NAME_LEN {
            return Err(DetectionError::RuleValidation {
                rule: self.name.clone(),
                reason: format!("rule name must not exceed {MAX_RULE_NAME_LEN} characters"),
            });
        }

        if self.occurrence_threshold == 0 {
            return Err(DetectionError::RuleValidation {
                rule: self.name.clone(),
                reason: "occurrence_threshold must be at least 1".to_owned(),
            });
        }

        if self.occurrence_threshold > 1 && self.time_window_seconds == 0 {
            return Err(DetectionError::RuleValidation {
                rule: self.name.clone(),
                reason: "time_window_seconds must be greater than 0 when occurrence_threshold > 1"
                    .to_owned(),
            });
        }

        for (field, value) in [("key_field", &self.key_field), ("count_field", &self.count_field)] {
            if value.as_deref().is_some_and(str::is_empty) {
                return Err(DetectionError::RuleValidation {
                    rule: self.name.clone(),
                    reason: format!("{field} must not be empty"),
                });
            }
        }

        Ok(())
    }
}

/// 패턴 지정 방식
///
/// 문자열만 쓰면 정규식 메타 문자 포함 여부로 종류를 추론합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    /// 종류를 추론하는 문자열
    Plain(String),
    /// 명시적 리터럴 (대소문자 무시 부분 문자열)
    Literal {
        /// 찾을 문자열
        literal: String,
    },
    /// 명시적 정규식
    Regex {
        /// 정규식
        regex: String,
    },
}

impl PatternSpec {
    /// 원본 패턴 문자열
    pub fn source(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Literal { literal } => literal,
            Self::Regex { regex } => regex,
        }
    }
}

impl From<&str> for PatternSpec {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_owned())
    }
}

/// 상관 키 추출 방식
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationKeySpec {
    /// 이벤트 필드
    Field(KeySource),
    /// 정규식 캡처 그룹
    Capture {
        /// 그룹 이름 또는 번호
        capture: CaptureRef,
        /// 추출 값 검증
        #[serde(default)]
        validate: KeyValidation,
    },
}

impl Default for CorrelationKeySpec {
    fn default() -> Self {
        Self::Field(KeySource::Hostname)
    }
}

impl CorrelationKeySpec {
    /// 이름 있는 캡처 그룹에서 키를 추출합니다.
    pub fn capture(name: impl Into<String>, validate: KeyValidation) -> Self {
        Self::Capture {
            capture: CaptureRef::Name(name.into()),
            validate,
        }
    }
}

/// 키로 사용할 이벤트 필드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// 호스트명 (기본값)
    #[default]
    Hostname,
    /// 송신 IP
    SourceIp,
    /// 프로세스명
    Process,
}

/// 캡처 그룹 참조
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureRef {
    /// 번호 (0은 전체 매칭)
    Index(usize),
    /// 이름
    Name(String),
}

/// 추출된 키 검증 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValidation {
    /// 검증 없음
    #[default]
    None,
    /// IPv4 주소
    Ipv4,
    /// IPv4 또는 IPv6 주소
    Ip,
    /// 호스트명 문자 집합
    Hostname,
}

impl KeyValidation {
    /// 값이 검증을 통과하는지 확인합니다.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::None => !value.is_empty(),
            Self::Ipv4 => value.parse::<std::net::Ipv4Addr>().is_ok(),
            Self::Ip => value.parse::<std::net::IpAddr>().is_ok(),
            Self::Hostname => {
                !value.is_empty()
                    && value.len() <= 253
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> RuleDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let rule = parse("patterns: ['link down']");
        assert!(rule.enabled);
        assert_eq!(rule.occurrence_threshold, 1);
        assert_eq!(rule.finding_cooldown_seconds, 600);
        assert_eq!(rule.severity, Severity::Info);
        assert_eq!(rule.correlation_key, CorrelationKeySpec::Field(KeySource::Hostname));
        assert_eq!(rule.key_field(), "correlation_key");
        assert_eq!(rule.count_field(), "occurrence_count");
    }

    #[test]
    fn severity_is_case_insensitive() {
        let rule = parse("patterns: ['x']\nseverity: high");
        assert_eq!(rule.severity, Severity::High);
        let rule = parse("patterns: ['x']\nseverity: Critical");
        assert_eq!(rule.severity, Severity::Critical);
        assert!(serde_yaml::from_str::<RuleDefinition>("patterns: ['x']\nseverity: bogus").is_err());
    }

    #[test]
    fn pattern_forms() {
        let rule = parse(
            r#"
patterns:
  - "plain text"
  - literal: "a.b"
  - regex: "err(or)?"
"#,
        );
        assert_eq!(rule.patterns[0], PatternSpec::Plain("plain text".to_owned()));
        assert_eq!(
            rule.patterns[1],
            PatternSpec::Literal {
                literal: "a.b".to_owned()
            }
        );
        assert_eq!(
            rule.patterns[2],
            PatternSpec::Regex {
                regex: "err(or)?".to_owned()
            }
        );
    }

    #[test]
    fn correlation_key_forms() {
        let rule = parse("patterns: ['x']\ncorrelation_key: source_ip");
        assert_eq!(rule.correlation_key, CorrelationKeySpec::Field(KeySource::SourceIp));

        let rule = parse("patterns: ['x']\ncorrelation_key: {capture: ip, validate: ipv4}");
        assert_eq!(
            rule.correlation_key,
            CorrelationKeySpec::capture("ip", KeyValidation::Ipv4)
        );

        let rule = parse("patterns: ['x']\ncorrelation_key: {capture: 2}");
        assert_eq!(
            rule.correlation_key,
            CorrelationKeySpec::Capture {
                capture: CaptureRef::Index(2),
                validate: KeyValidation::None,
            }
        );
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let rule = RuleDefinition::new("r", vec!["x".into()]).with_threshold(0, 60);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_window_with_threshold() {
        let rule = RuleDefinition::new("r", vec!["x".into()]).with_threshold(3, 0);
        assert!(rule.validate().is_err());
        let single = RuleDefinition::new("r", vec!["x".into()]).with_threshold(1, 0);
        single.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_names() {
        assert!(RuleDefinition::new("", vec!["x".into()]).validate().is_err());
        assert!(
            RuleDefinition::new("a".repeat(257), vec!["x".into()])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn validate_rejects_empty_field_names() {
        let rule = RuleDefinition::new("r", vec!["x".into()]).with_fields("", "count");
        assert!(rule.validate().is_err());
    }

    #[test]
    fn key_validation() {
        assert!(KeyValidation::Ipv4.accepts("10.0.0.5"));
        assert!(!KeyValidation::Ipv4.accepts("10.0.0.256"));
        assert!(!KeyValidation::Ipv4.accepts("::1"));
        assert!(KeyValidation::Ip.accepts("::1"));
        assert!(KeyValidation::Hostname.accepts("gw-01.site.local"));
        assert!(!KeyValidation::Hostname.accepts("bad host"));
        assert!(!KeyValidation::None.accepts(""));
    }
}
