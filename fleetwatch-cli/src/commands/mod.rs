//! Command handlers -- one module per subcommand

pub mod config;
pub mod ingest;
pub mod listen;
pub mod rules;
