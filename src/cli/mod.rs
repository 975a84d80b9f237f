//! CLI module for polarctl.
//!
//! This module provides the command-line interface for provisioning
//! PolarDB clusters from a manifest.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
