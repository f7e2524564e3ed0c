//! Command-line interface.
//!
//! Operator tooling for the locking layer: configuration checks, claim
//! column inspection, and an in-memory contention simulation.

pub mod commands;

use clap::{Parser, Subcommand};

/// kcvlock - consistent-key locking over key-column-value stores.
#[derive(Parser, Debug)]
#[command(name = "kcvlock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Encode or decode lock claim columns.
    Claim(commands::ClaimArgs),
    /// Race transactions from simulated processes on one key.
    Simulate(commands::SimulateArgs),
}
