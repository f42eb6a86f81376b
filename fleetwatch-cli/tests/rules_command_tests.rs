//! Integration tests for `fleetwatch rules` on rule files from disk.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use fleetwatch_cli::commands::rules::{list_report, validation_report};
use fleetwatch_core::types::Domain;
use fleetwatch_detection::RuleLoader;

const SECURITY: &str = r#"
security:
  RepeatedSSHLoginFailure:
    patterns:
      - 'Failed password for .* from (?P<ip>\d{1,3}(?:\.\d{1,3}){3})'
    occurrence_threshold: 5
    time_window_seconds: 120
    severity: High
    correlation_key: {capture: ip, validate: ipv4}
"#;

const WIFI: &str = r#"
wifi:
  ApDisconnect:
    patterns:
      - "disassociated"
    occurrence_threshold: 10
    time_window_seconds: 60
    severity: Warning
"#;

#[tokio::test]
async fn test_directory_rules_are_merged() {
    // Given: One rule file per domain
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join("security.yaml"), SECURITY).unwrap();
    fs::write(temp_dir.path().join("wifi.yml"), WIFI).unwrap();

    // When: Loading the directory
    let table = RuleLoader::load_path(temp_dir.path())
        .await
        .expect("directory should load");

    // Then: Both domains validate cleanly
    let report = validation_report(temp_dir.path(), &table);
    assert_eq!(report.total, 2);
    assert_eq!(report.active, 2);
    assert_eq!(report.invalid, 0, "errors: {:?}", report.errors);

    let listed = list_report(temp_dir.path(), &table, Some(Domain::Wifi));
    assert_eq!(listed.total, 1);
    assert_eq!(listed.rules[0].name, "ApDisconnect");
    assert_eq!(listed.rules[0].occurrence_threshold, 10);
}

#[tokio::test]
async fn test_invalid_entry_is_reported() {
    // Given: A rule with a zero threshold
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("rules.yaml");
    fs::write(
        &path,
        "system:\n  Broken:\n    patterns: [\"panic\"]\n    occurrence_threshold: 0\n",
    )
    .unwrap();

    // When: Validating
    let table = RuleLoader::load_path(&path).await.unwrap();
    let report = validation_report(&path, &table);

    // Then: The entry is skipped at load time and shows up as invalid
    assert_eq!(report.total, 0);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.errors[0].rule.as_deref(), Some("Broken"));
    assert!(report.errors[0].error.contains("occurrence_threshold"));
}

#[tokio::test]
async fn test_malformed_yaml_fails_to_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("rules.yaml");
    fs::write(&path, "security: [unclosed").unwrap();

    assert!(RuleLoader::load_path(&path).await.is_err());
}

#[test]
fn test_list_report_json_shape() {
    let table = RuleLoader::parse_yaml(SECURITY, "inline").unwrap();
    let report = list_report(Path::new("inline"), &table, None);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["total"].as_u64(), Some(1));
    assert_eq!(json["rules"][0]["status"].as_str(), Some("active"));
    assert!(
        json["rules"][0].get("reason").is_none(),
        "active rules carry no reason"
    );
}
