//! CLI-specific error types and exit code mapping

use fleetwatch_core::error::FleetwatchError;
use fleetwatch_detection::DetectionError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from fleetwatch-core.
    #[error("{0}")]
    Core(#[from] FleetwatchError),

    /// Log collection failed (file missing, socket bind, ...).
    #[error("collector error: {0}")]
    Collector(String),

    /// Rule table problem.
    #[error("rule error: {0}")]
    Rule(String),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                       |
    /// |------|-------------------------------|
    /// | 0    | Success                       |
    /// | 1    | General / command error       |
    /// | 2    | Configuration error           |
    /// | 3    | Collector (input) unavailable |
    /// | 10   | IO error                      |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Collector(_) => 3,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) | Self::Rule(_) => 1,
        }
    }
}

impl From<DetectionError> for CliError {
    fn from(e: DetectionError) -> Self {
        match e {
            DetectionError::Collector { .. } => Self::Collector(e.to_string()),
            DetectionError::RuleLoad { .. } | DetectionError::RuleValidation { .. } => {
                Self::Rule(e.to_string())
            }
            other => Self::Core(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_general_errors() {
        assert_eq!(CliError::Command("x".to_owned()).exit_code(), 1);
        assert_eq!(CliError::Rule("x".to_owned()).exit_code(), 1);
    }

    #[test]
    fn test_collector_error_maps_to_exit_code_3() {
        let err: CliError = DetectionError::Collector {
            source_type: "file".to_owned(),
            reason: "failed to open missing.log".to_owned(),
        }
        .into();
        assert!(matches!(err, CliError::Collector(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("missing.log"));
    }

    #[test]
    fn test_rule_load_error_maps_to_rule_variant() {
        let err: CliError = DetectionError::RuleLoad {
            path: "rules.yaml".to_owned(),
            reason: "invalid YAML".to_owned(),
        }
        .into();
        match err {
            CliError::Rule(msg) => assert!(msg.contains("rules.yaml")),
            other => panic!("expected Rule variant, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_is_wrapped_as_core() {
        let err: CliError = DetectionError::Parse {
            offset: 0,
            reason: "empty line".to_owned(),
        }
        .into();
        assert!(matches!(err, CliError::Core(FleetwatchError::Parse(_))));
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("configuration error"));
        assert!(display_str.contains("invalid TOML syntax"));
    }
}
