//! Configuration management for the screener.
//!
//! The screener reads a single configuration file at `~/.screener/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (SCREENER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SCREENER_CONCURRENCY` → runner.concurrency
//! - `SCREENER_SHUTDOWN_TIMEOUT_SECS` → runner.shutdown_timeout_secs
//! - `SCREENER_TEST_TRADE_DAYS` → screening.test_trade_days
//! - `SCREENER_TEST_END_DATE` → screening.test_end_date (YYYY-MM-DD)
//! - `SCREENER_LOG_LEVEL` → observability.log_level
//! - `SCREENER_LOG_FORMAT` → observability.log_format

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".screener"),
        |dirs| dirs.home_dir().join(".screener"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Runner
// ============================================================================

/// Concurrency settings for the screening runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Maximum number of instruments evaluated at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long `shutdown` waits for in-flight work, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    50
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Screening window
// ============================================================================

/// Bar window shared by every strategy in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningSettings {
    /// Number of daily bars each instrument must provide
    #[serde(default = "default_test_trade_days")]
    pub test_trade_days: usize,

    /// Inclusive upper bound on trade dates; `None` means latest available
    #[serde(default)]
    pub test_end_date: Option<NaiveDate>,
}

impl Default for ScreeningSettings {
    fn default() -> Self {
        Self {
            test_trade_days: default_test_trade_days(),
            test_end_date: None,
        }
    }
}

fn default_test_trade_days() -> usize {
    60
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerSettings,

    #[serde(default)]
    pub screening: ScreeningSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration, apply environment overrides and validate.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SCREENER_CONCURRENCY") {
            match value.parse() {
                Ok(n) => self.runner.concurrency = n,
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid SCREENER_CONCURRENCY"),
            }
        }
        if let Some(value) = lookup("SCREENER_SHUTDOWN_TIMEOUT_SECS") {
            match value.parse() {
                Ok(secs) => self.runner.shutdown_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    value = %value,
                    "Ignoring invalid SCREENER_SHUTDOWN_TIMEOUT_SECS"
                ),
            }
        }
        if let Some(value) = lookup("SCREENER_TEST_TRADE_DAYS") {
            match value.parse() {
                Ok(days) => self.screening.test_trade_days = days,
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid SCREENER_TEST_TRADE_DAYS"),
            }
        }
        if let Some(value) = lookup("SCREENER_TEST_END_DATE") {
            match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
                Ok(date) => self.screening.test_end_date = Some(date),
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid SCREENER_TEST_END_DATE"),
            }
        }
        if let Some(level) = lookup("SCREENER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("SCREENER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Reject settings the runner cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.runner.concurrency == 0 {
            return Err(Error::Config("runner.concurrency must be at least 1".into()));
        }
        if self.screening.test_trade_days == 0 {
            return Err(Error::Config(
                "screening.test_trade_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))
    }
}
