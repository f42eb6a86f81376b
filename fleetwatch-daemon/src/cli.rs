//! CLI argument definitions for fleetwatch-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! One process runs exactly one role: a domain agent or the orchestrator.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fleetwatch anomaly detection daemon.
///
/// Runs either a domain agent (rule evaluation for one log domain)
/// or the fleet orchestrator (finding aggregation and notification dedup).
#[derive(Parser, Debug)]
#[command(name = "fleetwatch-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to fleetwatch.toml configuration file.
    #[arg(short, long, global = true, default_value = "/etc/fleetwatch/fleetwatch.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long, global = true)]
    pub validate: bool,

    /// Role to run.
    #[command(subcommand)]
    pub role: RoleCommand,
}

/// Process roles.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RoleCommand {
    /// Run a domain agent.
    Agent {
        /// Domain to evaluate (wifi, security, connectivity, system, ...).
        ///
        /// Falls back to `[agent].domain` in the config file.
        #[arg(short, long)]
        domain: Option<String>,

        /// Override the agent identifier.
        #[arg(long)]
        agent_id: Option<String>,

        /// Override the rule table path (file or directory).
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Run the fleet orchestrator.
    Orchestrator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_with_global_flags_after_subcommand() {
        let cli = DaemonCli::parse_from([
            "fleetwatch-daemon",
            "agent",
            "--domain",
            "wifi",
            "--config",
            "/tmp/fw.toml",
            "--log-format",
            "pretty",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/fw.toml"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert_eq!(
            cli.role,
            RoleCommand::Agent {
                domain: Some("wifi".to_owned()),
                agent_id: None,
                rules: None,
            }
        );
    }

    #[test]
    fn parses_orchestrator_with_validate() {
        let cli = DaemonCli::parse_from(["fleetwatch-daemon", "--validate", "orchestrator"]);
        assert!(cli.validate);
        assert_eq!(cli.role, RoleCommand::Orchestrator);
    }

    #[test]
    fn role_is_required() {
        assert!(DaemonCli::try_parse_from(["fleetwatch-daemon"]).is_err());
    }
}
