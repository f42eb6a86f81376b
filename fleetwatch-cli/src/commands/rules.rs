//! `fleetwatch rules` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use fleetwatch_core::types::Domain;
use fleetwatch_detection::RuleLoader;
use fleetwatch_detection::rule::{CompiledRule, RuleTable, SkippedRule};

use crate::cli::{RulesAction, RulesArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `rules` command.
pub async fn execute(args: RulesArgs, writer: &OutputWriter) -> Result<(), CliError> {
    match args.action {
        RulesAction::List { path, domain } => execute_list(&path, domain, writer).await,
        RulesAction::Validate { path } => execute_validate(&path, writer).await,
    }
}

async fn execute_list(
    path: &Path,
    domain: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let domain = domain
        .map(|d| d.parse::<Domain>().map_err(CliError::Command))
        .transpose()?;

    info!(path = %path.display(), "loading rule table");
    let table = RuleLoader::load_path(path).await?;

    writer.render(&list_report(path, &table, domain))?;
    Ok(())
}

async fn execute_validate(path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %path.display(), "validating rule table");

    let report = match RuleLoader::load_path(path).await {
        Ok(table) => validation_report(path, &table),
        Err(e) => RuleValidationReport {
            path: path.display().to_string(),
            total: 0,
            active: 0,
            disabled: 0,
            invalid: 1,
            errors: vec![RuleIssue {
                domain: None,
                rule: None,
                error: e.to_string(),
            }],
            warnings: Vec::new(),
        },
    };

    writer.render(&report)?;

    if report.invalid > 0 {
        return Err(CliError::Rule(format!(
            "{} invalid rule entr{}",
            report.invalid,
            if report.invalid == 1 { "y" } else { "ies" }
        )));
    }
    if report.total == 0 {
        return Err(CliError::Rule(format!(
            "no rules found in {}",
            path.display()
        )));
    }

    Ok(())
}

/// Compile every rule of `table` and list it, optionally for one domain.
pub fn list_report(path: &Path, table: &RuleTable, domain: Option<Domain>) -> RuleListReport {
    let rules: Vec<RuleEntry> = table
        .iter()
        .filter(|(d, _)| domain.is_none_or(|wanted| wanted == *d))
        .map(|(d, def)| RuleEntry::new(d, CompiledRule::compile(def.clone())))
        .collect();

    RuleListReport {
        path: path.display().to_string(),
        total: rules.len(),
        rules,
        skipped: table
            .skipped()
            .iter()
            .filter(|s| domain.is_none_or(|wanted| s.domain == wanted.as_str()))
            .map(RuleIssue::from)
            .collect(),
    }
}

/// Classify every entry of `table` as active, deliberately disabled, or invalid.
///
/// Rules turned off with `enabled: false` are not errors.
pub fn validation_report(path: &Path, table: &RuleTable) -> RuleValidationReport {
    let mut active = 0;
    let mut disabled = 0;
    let mut errors: Vec<RuleIssue> = table.skipped().iter().map(RuleIssue::from).collect();
    let mut warnings = Vec::new();

    for (domain, def) in table.iter() {
        let compiled = CompiledRule::compile(def.clone());
        match compiled.disabled_reason() {
            None => {
                active += 1;
                warnings.extend(compiled.failed_patterns().iter().map(|(_, reason)| {
                    RuleIssue {
                        domain: Some(domain.to_string()),
                        rule: Some(def.name.clone()),
                        error: reason.clone(),
                    }
                }));
            }
            Some(_) if !def.enabled => disabled += 1,
            Some(reason) => errors.push(RuleIssue {
                domain: Some(domain.to_string()),
                rule: Some(def.name.clone()),
                error: reason.to_owned(),
            }),
        }
    }

    RuleValidationReport {
        path: path.display().to_string(),
        total: table.len(),
        active,
        disabled,
        invalid: errors.len(),
        errors,
        warnings,
    }
}

#[derive(Debug, Serialize)]
pub struct RuleListReport {
    pub path: String,
    pub total: usize,
    pub rules: Vec<RuleEntry>,
    pub skipped: Vec<RuleIssue>,
}

#[derive(Debug, Serialize)]
pub struct RuleEntry {
    pub domain: String,
    pub name: String,
    pub severity: String,
    pub patterns: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_patterns: Vec<String>,
    pub occurrence_threshold: u32,
    pub time_window_seconds: u64,
    pub finding_cooldown_seconds: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RuleEntry {
    fn new(domain: Domain, compiled: CompiledRule) -> Self {
        let def = compiled.definition();
        Self {
            domain: domain.to_string(),
            name: def.name.clone(),
            severity: def.severity.to_string(),
            patterns: compiled.patterns().len(),
            dropped_patterns: compiled
                .failed_patterns()
                .iter()
                .map(|(source, _)| source.clone())
                .collect(),
            occurrence_threshold: def.occurrence_threshold,
            time_window_seconds: def.time_window_seconds,
            finding_cooldown_seconds: def.finding_cooldown_seconds,
            status: if compiled.is_active() {
                "active".to_owned()
            } else {
                "disabled".to_owned()
            },
            reason: compiled.disabled_reason().map(str::to_owned),
        }
    }
}

/// A rule entry that cannot be used.
#[derive(Debug, Serialize)]
pub struct RuleIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub error: String,
}

impl From<&SkippedRule> for RuleIssue {
    fn from(skipped: &SkippedRule) -> Self {
        Self {
            domain: Some(skipped.domain.clone()),
            rule: skipped.rule.clone(),
            error: if skipped.source.is_empty() {
                skipped.reason.clone()
            } else {
                format!("{} ({})", skipped.reason, skipped.source)
            },
        }
    }
}

impl RuleIssue {
    fn label(&self) -> String {
        match (&self.domain, &self.rule) {
            (Some(domain), Some(rule)) => format!("{domain}/{rule}"),
            (Some(domain), None) => domain.clone(),
            (None, Some(rule)) => rule.clone(),
            (None, None) => "-".to_owned(),
        }
    }
}

impl Render for RuleListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Rules in {} ({} total)",
            self.path,
            self.total.to_string().bold()
        )?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<14} {:<32} {:<10} {:>9} {:>8} {:>9}  Status",
            "Domain", "Name", "Severity", "Threshold", "Window", "Cooldown"
        )?;
        writeln!(w, "{}", "-".repeat(100))?;

        for r in &self.rules {
            let status = match (r.reason.as_deref(), r.dropped_patterns.len()) {
                (Some(reason), _) => format!("{} ({})", r.status, reason).yellow(),
                (None, 0) => r.status.green(),
                (None, n) => format!("{} ({n} pattern(s) dropped)", r.status).yellow(),
            };
            writeln!(
                w,
                "{:<14} {:<32} {:<10} {:>9} {:>7}s {:>8}s  {}",
                r.domain,
                r.name,
                r.severity,
                r.occurrence_threshold,
                r.time_window_seconds,
                r.finding_cooldown_seconds,
                status
            )?;
        }

        if !self.skipped.is_empty() {
            writeln!(w)?;
            writeln!(w, "Skipped entries:")?;
            for s in &self.skipped {
                writeln!(w, "  {}: {}", s.label().red(), s.error)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RuleValidationReport {
    pub path: String,
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    pub invalid: usize,
    pub errors: Vec<RuleIssue>,
    /// Patterns dropped from rules that are still active
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RuleIssue>,
}

impl Render for RuleValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Rule Validation: {}", self.path.bold())?;
        writeln!(
            w,
            "  Rules: {} total, {} active, {} disabled, {} invalid",
            self.total,
            self.active.to_string().green(),
            self.disabled,
            if self.invalid > 0 {
                self.invalid.to_string().red()
            } else {
                self.invalid.to_string().normal()
            }
        )?;

        if !self.errors.is_empty() {
            writeln!(w)?;
            writeln!(w, "Errors:")?;
            for e in &self.errors {
                writeln!(w, "  {}: {}", e.label().red(), e.error)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(w)?;
            writeln!(w, "Dropped patterns:")?;
            for e in &self.warnings {
                writeln!(w, "  {}: {}", e.label().yellow(), e.error)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
security:
  SshBruteForce:
    patterns:
      - "Failed password for"
    occurrence_threshold: 5
    time_window_seconds: 300
    severity: High
  LegacyTelnet:
    enabled: false
    patterns:
      - "telnetd"
wifi:
  BadRegex:
    patterns:
      - regex: "(unclosed"
unknown_domain:
  Whatever:
    patterns:
      - "x"
"#;

    fn table() -> RuleTable {
        RuleLoader::parse_yaml(TABLE, "test.yaml").expect("table should parse")
    }

    #[test]
    fn validation_separates_disabled_from_invalid() {
        let report = validation_report(Path::new("test.yaml"), &table());

        assert_eq!(report.total, 3);
        assert_eq!(report.active, 1);
        assert_eq!(report.disabled, 1, "enabled: false is not an error");
        // bad regex + unknown domain
        assert_eq!(report.invalid, 2, "errors: {:?}", report.errors);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.rule.as_deref() == Some("BadRegex"))
        );
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.domain.as_deref() == Some("unknown_domain"))
        );
    }

    #[test]
    fn list_filters_by_domain() {
        let report = list_report(Path::new("test.yaml"), &table(), Some(Domain::Security));

        assert_eq!(report.total, 2);
        assert!(report.rules.iter().all(|r| r.domain == "security"));
        assert!(report.skipped.is_empty(), "unknown domain is filtered out");

        let brute = report
            .rules
            .iter()
            .find(|r| r.name == "SshBruteForce")
            .expect("rule should be listed");
        assert_eq!(brute.status, "active");
        assert_eq!(brute.occurrence_threshold, 5);
        assert_eq!(brute.patterns, 1);
        assert!(brute.reason.is_none());
    }

    #[test]
    fn list_reports_compile_failures_as_disabled() {
        let report = list_report(Path::new("test.yaml"), &table(), Some(Domain::Wifi));

        assert_eq!(report.total, 1);
        assert_eq!(report.rules[0].status, "disabled");
        assert!(report.rules[0].reason.is_some());
    }

    #[test]
    fn partially_broken_rule_is_active_with_warning() {
        let yaml = r#"
system:
  OomKill:
    patterns:
      - "Out of memory"
      - regex: "(unclosed"
"#;
        let table = RuleLoader::parse_yaml(yaml, "test.yaml").expect("table should parse");
        let report = validation_report(Path::new("test.yaml"), &table);

        assert_eq!(report.active, 1);
        assert_eq!(report.invalid, 0, "errors: {:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].rule.as_deref(), Some("OomKill"));

        let listed = list_report(Path::new("test.yaml"), &table, None);
        assert_eq!(listed.rules[0].status, "active");
        assert_eq!(listed.rules[0].patterns, 1);
        assert_eq!(listed.rules[0].dropped_patterns, vec!["(unclosed".to_owned()]);
    }

    #[test]
    fn render_validation_text_lists_errors() {
        let report = validation_report(Path::new("test.yaml"), &table());
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).unwrap();
        let output = String::from_utf8(buffer).unwrap();

        assert!(output.contains("Rule Validation"));
        assert!(output.contains("wifi/BadRegex"));
    }
}
