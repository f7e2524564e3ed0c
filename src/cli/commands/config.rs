//! Config command implementation.

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file given with --config.
    Validate,
    /// Print the effective configuration, defaults included.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Load `path`, or the defaults when no path is given, then apply overrides
/// and re-validate.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    config.apply_overrides(overrides);
    config
        .validate()
        .with_context(|| "invalid configuration after applying overrides")?;
    Ok(config)
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, path: Option<&Path>, config: &Config) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(path, config),
        ConfigCommand::Show { format } => show_config(config, &format),
    }
}

fn validate_config(path: Option<&Path>, config: &Config) -> Result<()> {
    match path {
        Some(path) => println!("✓ {:?} is valid", path),
        None => println!("✓ default configuration is valid"),
    }
    if config.locking.instance_id.is_none() {
        println!("  ⚠ Warning: locking.instance_id not set; a random id is generated per process");
    }
    println!(
        "  wait={}ms expire={}ms retries={} resolution={}",
        config.locking.wait_ms,
        config.locking.expire_ms,
        config.locking.retries,
        config.storage.timestamp_resolution
    );
    Ok(())
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        "toml" => print!("{}", toml::to_string_pretty(config)?),
        other => anyhow::bail!("unknown format: {other} (expected toml or json)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults_without_path() {
        let config = load_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.locking.wait_ms, 100);
    }

    #[test]
    fn test_overrides_are_validated() {
        let overrides = ConfigOverrides {
            wait_ms: Some(500_000),
            ..Default::default()
        };
        assert!(load_config(None, &overrides).is_err());
    }

    #[test]
    fn test_show_rejects_unknown_format() {
        assert!(show_config(&Config::default(), "yaml").is_err());
    }
}
