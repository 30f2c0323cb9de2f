//! Command-line adapter for voxrelay.
//!
//! - [`parser`] and [`commands`] define the clap interface
//! - [`bootstrap`] is the composition root: configuration, logging,
//!   database and core services
//! - [`handlers`] run one command each against a [`CliContext`]
//! - [`presentation`] formats records for the terminal
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Silence unused dev-dependency warnings for test infrastructure
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;
pub mod store_commands;

// Re-export primary types for convenient access
pub use bootstrap::{CliContext, bootstrap, init_tracing};
pub use commands::{Commands, SubmitArgs, WorkerArgs};
pub use error::{CliError, exit_code_for};
pub use parser::Cli;
pub use store_commands::{ModelCommand, ProfileCommand, VoiceCommand};
