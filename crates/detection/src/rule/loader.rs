//! 규칙 테이블 로더 -- 도메인별 규칙 YAML을 디스크에서 로드합니다.
//!
//! 최상위 키는 도메인, 그 아래 키는 규칙 이름입니다.
//! 알 수 없는 도메인이나 잘못된 규칙 항목은 경고 로그를 남기고 건너뜁니다.
//! 경로가 디렉토리이면 안의 `.yml`/`.yaml` 파일을 모두 합칩니다.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use fleetwatch_core::types::Domain;
use serde_yaml::Value;

use super::types::RuleDefinition;
use crate::error::DetectionError;

/// 규칙 파일 로더 설정
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_RULES_COUNT: usize = 10_000;

/// 건너뛴 규칙 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRule {
    /// 출처 (파일 경로 등)
    pub source: String,
    /// 도메인 키 원문
    pub domain: String,
    /// 규칙 이름 (도메인 자체가 잘못된 경우 None)
    pub rule: Option<String>,
    /// 건너뛴 사유
    pub reason: String,
}

/// 도메인별 규칙 테이블
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: BTreeMap<Domain, Vec<RuleDefinition>>,
    skipped: Vec<SkippedRule>,
}

impl RuleTable {
    /// 도메인의 규칙 목록 (없으면 빈 목록)
    pub fn rules_for(&self, domain: Domain) -> Vec<RuleDefinition> {
        self.rules.get(&domain).cloned().unwrap_or_default()
    }

    /// 모든 (도메인, 규칙) 쌍
    pub fn iter(&self) -> impl Iterator<Item = (Domain, &RuleDefinition)> {
        self.rules
            .iter()
            .flat_map(|(domain, rules)| rules.iter().map(move |rule| (*domain, rule)))
    }

    /// 로딩 중 건너뛴 항목
    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    /// 전체 규칙 수
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// 규칙이 하나도 없는지
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn merge(&mut self, other: RuleTable) {
        for (domain, rules) in other.rules {
            let existing = self.rules.entry(domain).or_default();
            for rule in rules {
                if existing.iter().any(|r| r.name == rule.name) {
                    tracing::warn!(
                        domain = %domain,
                        rule = %rule.name,
                        "duplicate rule name across files, keeping first"
                    );
                    self.skipped.push(SkippedRule {
                        source: String::new(),
                        domain: domain.to_string(),
                        rule: Some(rule.name),
                        reason: "duplicate rule name".to_owned(),
                    });
                    continue;
                }
                existing.push(rule);
            }
        }
        self.skipped.extend(other.skipped);
    }
}

/// 규칙 테이블 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 파일 또는 디렉토리에서 규칙 테이블을 로드합니다.
    pub async fn load_path(path: impl AsRef<Path>) -> Result<RuleTable, DetectionError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DetectionError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read metadata: {e}"),
            })?;

        if metadata.is_dir() {
            Self::load_directory(path).await
        } else {
            Self::load_file(path).await
        }
    }

    /// 디렉토리의 모든 YAML 규칙 파일을 로드합니다.
    ///
    /// 개별 파일 로딩 실패는 경고 로그를 남기고 건너뜁니다.
    /// 파일은 이름순으로 처리하며, 같은 도메인의 같은 규칙 이름은 먼저 읽은 것을 유지합니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 규칙 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(dir: impl AsRef<Path>) -> Result<RuleTable, DetectionError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| DetectionError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DetectionError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory entry: {e}"),
            })?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut table = RuleTable::default();
        for path in paths {
            match Self::load_file(&path).await {
                Ok(loaded) => table.merge(loaded),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule file, skipping"
                    );
                }
            }

            if table.len() > MAX_RULES_COUNT {
                return Err(DetectionError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = table.len(),
            "loaded rule table"
        );
        Ok(table)
    }

    /// 단일 YAML 파일에서 규칙 테이블을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<RuleTable, DetectionError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DetectionError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(DetectionError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DetectionError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 규칙 테이블로 파싱합니다.
    ///
    /// 문서 전체가 매핑이 아니면 에러, 항목 단위 문제는 경고 후 건너뜁니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<RuleTable, DetectionError> {
        let document: Value =
            serde_yaml::from_str(yaml_str).map_err(|e| DetectionError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        let mut table = RuleTable::default();
        let domains = match document {
            Value::Mapping(map) => map,
            Value::Null => return Ok(table),
            _ => {
                return Err(DetectionError::RuleLoad {
                    path: source.to_owned(),
                    reason: "top level must be a mapping of domain -> rules".to_owned(),
                });
            }
        };

        for (domain_key, rules_value) in domains {
            let domain_name = yaml_key(&domain_key);
            let domain = match domain_name.parse::<Domain>() {
                Ok(domain) => domain,
                Err(reason) => {
                    tracing::warn!(source, domain = %domain_name, "unknown domain in rule table, skipping");
                    table.skipped.push(SkippedRule {
                        source: source.to_owned(),
                        domain: domain_name,
                        rule: None,
                        reason,
                    });
                    continue;
                }
            };

            let Value::Mapping(rules) = rules_value else {
                tracing::warn!(source, domain = %domain, "domain entry is not a mapping, skipping");
                table.skipped.push(SkippedRule {
                    source: source.to_owned(),
                    domain: domain_name,
                    rule: None,
                    reason: "domain entry must be a mapping of rule name -> rule".to_owned(),
                });
                continue;
            };

            let mut seen = HashSet::new();
            let entries = table.rules.entry(domain).or_default();
            for (name_key, rule_value) in rules {
                let name = yaml_key(&name_key);
                let result = serde_yaml::from_value::<RuleDefinition>(rule_value)
                    .map_err(|e| e.to_string())
                    .and_then(|mut rule| {
                        rule.name = name.clone();
                        rule.validate().map_err(|e| e.to_string())?;
                        Ok(rule)
                    });

                match result {
                    Ok(_) if !seen.insert(name.clone()) => {
                        tracing::warn!(source, domain = %domain, rule = %name, "duplicate rule name, skipping");
                        table.skipped.push(SkippedRule {
                            source: source.to_owned(),
                            domain: domain_name.clone(),
                            rule: Some(name),
                            reason: "duplicate rule name".to_owned(),
                        });
                    }
                    Ok(rule) => entries.push(rule),
                    Err(reason) => {
                        tracing::warn!(
                            source,
                            domain = %domain,
                            rule = %name,
                            error = %reason,
                            "invalid rule entry, skipping"
                        );
                        table.skipped.push(SkippedRule {
                            source: source.to_owned(),
                            domain: domain_name.clone(),
                            rule: Some(name),
                            reason,
                        });
                    }
                }
            }
        }

        Ok(table)
    }
}

fn yaml_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_owned())
            .unwrap_or_default(),
    }
}
