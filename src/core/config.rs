//! Configuration parsing and validation.
//!
//! Configuration is loaded from TOML files with CLI overrides. Every section
//! and field has a default, so an empty file is a valid configuration.

use crate::core::time::TimestampResolution;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Consistent-key locking parameters.
    #[serde(default)]
    pub locking: LockingConfig,

    /// Store interaction budgets and timestamp format.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Consistent-key locking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Identity written into every claim from this process. Generated when absent.
    #[serde(default)]
    pub instance_id: Option<String>,

    /// Time for a claim write to become visible to every reader, in milliseconds.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    /// Age after which a claim is considered abandoned, in milliseconds.
    #[serde(default = "default_expire_ms")]
    pub expire_ms: u64,

    /// Attempts for each claim write or delete.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delete abandoned claims when they are encountered.
    #[serde(default = "default_clean_expired")]
    pub clean_expired: bool,

    /// Window during which repeated cleanups of one target are suppressed.
    #[serde(default = "default_cleaner_cooldown_ms")]
    pub cleaner_cooldown_ms: u64,

    /// Namespace prefix for local lock mediators.
    #[serde(default = "default_local_mediator_prefix")]
    pub local_mediator_prefix: String,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            wait_ms: default_wait_ms(),
            expire_ms: default_expire_ms(),
            retries: default_retries(),
            clean_expired: default_clean_expired(),
            cleaner_cooldown_ms: default_cleaner_cooldown_ms(),
            local_mediator_prefix: default_local_mediator_prefix(),
        }
    }
}

impl LockingConfig {
    /// Propagation delay.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    /// Expiry threshold.
    pub fn lock_expire(&self) -> Duration {
        Duration::from_millis(self.expire_ms)
    }

    /// Cleaner duplicate-suppression window.
    pub fn cleaner_cooldown(&self) -> Duration {
        Duration::from_millis(self.cleaner_cooldown_ms)
    }
}

/// Store interaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Budget for a single read, including retries, in milliseconds.
    #[serde(default = "default_max_read_time_ms")]
    pub max_read_time_ms: u64,

    /// Budget for a single write, including retries, in milliseconds.
    #[serde(default = "default_max_write_time_ms")]
    pub max_write_time_ms: u64,

    /// Resolution of claim timestamps.
    #[serde(default)]
    pub timestamp_resolution: TimestampResolution,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_read_time_ms: default_max_read_time_ms(),
            max_write_time_ms: default_max_write_time_ms(),
            timestamp_resolution: TimestampResolution::default(),
        }
    }
}

impl StorageConfig {
    pub fn max_read_time(&self) -> Duration {
        Duration::from_millis(self.max_read_time_ms)
    }

    pub fn max_write_time(&self) -> Duration {
        Duration::from_millis(self.max_write_time_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_wait_ms() -> u64 {
    100
}

fn default_expire_ms() -> u64 {
    300_000
}

fn default_retries() -> u32 {
    3
}

fn default_clean_expired() -> bool {
    true
}

fn default_cleaner_cooldown_ms() -> u64 {
    300_000
}

fn default_local_mediator_prefix() -> String {
    "kcv".to_string()
}

fn default_max_read_time_ms() -> u64 {
    10_000
}

fn default_max_write_time_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref instance_id) = overrides.instance_id {
            self.locking.instance_id = Some(instance_id.clone());
        }
        if let Some(wait_ms) = overrides.wait_ms {
            self.locking.wait_ms = wait_ms;
        }
        if let Some(expire_ms) = overrides.expire_ms {
            self.locking.expire_ms = expire_ms;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_locking()?;
        self.validate_storage()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_locking(&self) -> Result<()> {
        let locking = &self.locking;

        if let Some(ref id) = locking.instance_id {
            if id.is_empty() {
                anyhow::bail!("locking.instance_id must not be empty when set");
            }
        }

        if locking.wait_ms == 0 {
            anyhow::bail!("locking.wait_ms must be > 0");
        }

        // A claim must outlive the wait before it is checked, or every check
        // would find its own claim already expired.
        if locking.expire_ms <= locking.wait_ms {
            anyhow::bail!(
                "locking.expire_ms ({}) must exceed locking.wait_ms ({})",
                locking.expire_ms,
                locking.wait_ms
            );
        }

        if locking.retries == 0 {
            anyhow::bail!("locking.retries must be >= 1");
        }

        if locking.local_mediator_prefix.is_empty() {
            anyhow::bail!("locking.local_mediator_prefix must not be empty");
        }

        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        if self.storage.max_read_time_ms == 0 {
            anyhow::bail!("storage.max_read_time_ms must be > 0");
        }
        if self.storage.max_write_time_ms == 0 {
            anyhow::bail!("storage.max_write_time_ms must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the claim identity.
    pub instance_id: Option<String>,
    /// Override the propagation delay.
    pub wait_ms: Option<u64>,
    /// Override the expiry threshold.
    pub expire_ms: Option<u64>,
}
