//! kcvlock - unified CLI entrypoint.
//!
//! Usage:
//!   kcvlock --config config/kcvlock.toml config validate
//!   kcvlock config show --format json
//!   kcvlock claim encode --timestamp 1700000000000000000 --rid node-a
//!   kcvlock claim decode 00060a24181e40006e6f64652d61
//!   kcvlock simulate --contenders 5 --wait-ms 20

use anyhow::Result;
use clap::Parser;
use kcv_locking::cli::commands::{init_tracing, load_config, run_claim, run_config, run_simulate};
use kcv_locking::cli::{Cli, Commands};
use kcv_locking::core::config::ConfigOverrides;
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.map(PathBuf::from);
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        ..Default::default()
    };
    let config = load_config(config_path.as_deref(), &overrides)?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Config(args) => run_config(args, config_path.as_deref(), &config),
        Commands::Claim(args) => run_claim(args),
        Commands::Simulate(args) => run_simulate(args, &config),
    }
}
