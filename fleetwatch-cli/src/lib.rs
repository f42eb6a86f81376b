//! Fleetwatch CLI library
//!
//! Exposes the command handlers so they can be driven from integration tests.

pub mod cli;
pub mod commands;
pub mod error;
pub mod forward;
pub mod output;
