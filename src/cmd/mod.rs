//! CLI command handlers

use clap::Subcommand;

pub mod diagnostics;
pub mod host;
pub mod runner;

#[derive(Subcommand)]
pub enum Commands {
    /// Run diagnostics and display system information
    Diagnostics,
}
