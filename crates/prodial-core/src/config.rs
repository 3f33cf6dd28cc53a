//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DialerConfig {
    pub engine: EngineConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
}

/// Control-loop and lock-recovery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Autodial tick interval in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,

    /// Contact lock TTL before a lock is considered abandoned
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,

    /// Caller ID presented on outbound calls
    #[serde(default = "default_caller_id")]
    pub caller_id: String,

    /// How long finished queue entries are kept before the tick prunes them
    #[serde(default = "default_completed_retention")]
    pub completed_retention_secs: i64,
}

fn default_tick_secs() -> u64 {
    10
}

fn default_lock_ttl() -> i64 {
    300
}

fn default_completed_retention() -> i64 {
    3600
}

fn default_caller_id() -> String {
    "0000000000".to_string()
}

/// Pacing algorithm tuning
#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    /// Floor applied to the connection rate to prevent division blow-up
    #[serde(default = "default_connection_rate_floor")]
    pub connection_rate_floor: f64,

    /// Damping factor applied when the abandon rate exceeds the threshold
    #[serde(default = "default_abandon_damping")]
    pub abandon_damping: f64,

    /// EWMA smoothing factor for metric updates (weight of the new sample)
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
}

fn default_connection_rate_floor() -> f64 {
    0.1
}

fn default_abandon_damping() -> f64 {
    0.8
}

fn default_ewma_alpha() -> f64 {
    0.3
}

/// Retry backoff table, keyed by dial outcome
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Backoff after a no-answer outcome, in seconds
    #[serde(default = "default_no_answer_backoff")]
    pub no_answer_backoff_secs: i64,

    /// Backoff after a busy outcome, in seconds
    #[serde(default = "default_busy_backoff")]
    pub busy_backoff_secs: i64,

    /// Backoff after a system-failure outcome, in seconds
    #[serde(default = "default_failed_backoff")]
    pub failed_backoff_secs: i64,

    /// Backoff after an abandoned call, in seconds
    #[serde(default = "default_abandoned_backoff")]
    pub abandoned_backoff_secs: i64,
}

fn default_no_answer_backoff() -> i64 {
    300
}

fn default_busy_backoff() -> i64 {
    180
}

fn default_failed_backoff() -> i64 {
    300
}

fn default_abandoned_backoff() -> i64 {
    600
}

impl DialerConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("engine.tick_interval_secs", 10)?
            .set_default("engine.lock_ttl_secs", 300)?
            .set_default("engine.caller_id", "0000000000")?
            .set_default("engine.completed_retention_secs", 3600)?
            .set_default("pacing.connection_rate_floor", 0.1)?
            .set_default("pacing.abandon_damping", 0.8)?
            .set_default("pacing.ewma_alpha", 0.3)?
            .set_default("retry.no_answer_backoff_secs", 300)?
            .set_default("retry.busy_backoff_secs", 180)?
            .set_default("retry.failed_backoff_secs", 300)?
            .set_default("retry.abandoned_backoff_secs", 600)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with PRODIAL_ prefix
            .add_source(
                Environment::with_prefix("PRODIAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PRODIAL").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            lock_ttl_secs: 300,
            caller_id: default_caller_id(),
            completed_retention_secs: 3600,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            connection_rate_floor: 0.1,
            abandon_damping: 0.8,
            ewma_alpha: 0.3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            no_answer_backoff_secs: 300,
            busy_backoff_secs: 180,
            failed_backoff_secs: 300,
            abandoned_backoff_secs: 600,
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval_secs, 10);
        assert_eq!(config.lock_ttl_secs, 300);
        assert_eq!(config.completed_retention_secs, 3600);
    }

    #[test]
    fn test_default_retry_backoffs() {
        let retry = RetryConfig::default();
        assert_eq!(retry.no_answer_backoff_secs, 300);
        assert_eq!(retry.busy_backoff_secs, 180);
        assert_eq!(retry.abandoned_backoff_secs, 600);
    }

    #[test]
    fn test_default_pacing_tuning() {
        let pacing = PacingConfig::default();
        assert!(pacing.connection_rate_floor > 0.0);
        assert!(pacing.abandon_damping < 1.0);
    }
}
