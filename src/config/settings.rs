//! # Configuration Settings
//!
//! Defines the configuration structure for the test database harness.

use crate::errors::{HarnessError, Result};
use crate::observability::LoggerKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct HarnessConfig {
    /// Database pool configuration
    #[validate(nested)]
    pub pool: PoolConfig,

    /// Where database files are materialized
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(HarnessError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if self.pool.retry_backoff_ms > self.pool.max_retry_backoff_ms {
            return Err(HarnessError::validation_field(
                "retry_backoff_ms cannot be greater than max_retry_backoff_ms",
                "pool.retry_backoff_ms",
            ));
        }

        if self.storage.working_directory.as_os_str().is_empty() {
            return Err(HarnessError::validation_field(
                "working directory cannot be empty",
                "storage.working_directory",
            ));
        }

        Ok(())
    }
}

/// Process-wide pool sizing and timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of background builder workers
    #[validate(range(min = 1, max = 64, message = "Prepare thread count must be between 1 and 64"))]
    pub prepare_thread_count: usize,

    /// Target number of ready empty databases
    #[validate(range(max = 64, message = "Empty database count must be at most 64"))]
    pub empty_databases_count: usize,

    /// Target number of ready schema databases
    #[validate(range(max = 64, message = "Schema database count must be at most 64"))]
    pub schema_databases_count: usize,

    /// Upper bound on how long an attach waits for a ready database
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Attach timeout must be between 1 and 3600 seconds"
    ))]
    pub attach_timeout_seconds: u64,

    /// Build attempts per database before the failure is reported to a waiter
    #[validate(range(min = 1, max = 20, message = "Max build attempts must be between 1 and 20"))]
    pub max_build_attempts: u32,

    /// Initial delay between build attempts, doubled after each failure
    #[validate(range(min = 1, message = "Retry backoff must be at least 1ms"))]
    pub retry_backoff_ms: u64,

    /// Cap for the doubled retry delay
    pub max_retry_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prepare_thread_count: 4,
            empty_databases_count: 2,
            schema_databases_count: 4,
            attach_timeout_seconds: 120,
            max_build_attempts: 3,
            retry_backoff_ms: 100,
            max_retry_backoff_ms: 2_000,
        }
    }
}

impl PoolConfig {
    /// Get attach timeout as Duration
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_seconds)
    }

    /// Delay before the given retry (1-based), doubling up to the cap
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self.retry_backoff_ms.saturating_mul(factor).min(self.max_retry_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Database file placement
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for harness artifacts
    pub working_directory: PathBuf,

    /// Subfolder of the working directory that holds database files
    #[validate(length(min = 1, message = "Database folder cannot be empty"))]
    pub database_folder: String,

    /// Delete leftover database files from earlier runs on pool start
    pub purge_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("."),
            database_folder: "LocalDb".to_string(),
            purge_on_start: true,
        }
    }
}

impl StorageConfig {
    /// Directory the builder writes database files into
    pub fn database_directory(&self) -> PathBuf {
        self.working_directory.join(&self.database_folder)
    }
}

/// Logging backends available to fixtures
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rolling log files
    pub log_directory: PathBuf,

    /// Rolling log file name prefix
    #[validate(length(min = 1, message = "Log file prefix cannot be empty"))]
    pub file_prefix: String,

    /// Log level filter (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Logger used when a fixture does not choose one
    pub default_logger: LoggerKind,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
            file_prefix: "umbraco_integration_tests".to_string(),
            log_level: "info".to_string(),
            default_logger: LoggerKind::Mock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.prepare_thread_count, 4);
        assert_eq!(config.empty_databases_count, 2);
        assert_eq!(config.schema_databases_count, 4);
        assert_eq!(config.attach_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_retry_backoff_doubles_up_to_cap() {
        let config =
            PoolConfig { retry_backoff_ms: 100, max_retry_backoff_ms: 350, ..Default::default() };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(350));
        assert_eq!(config.retry_backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_database_directory() {
        let config = StorageConfig {
            working_directory: PathBuf::from("/tmp/run"),
            ..Default::default()
        };
        assert_eq!(config.database_directory(), PathBuf::from("/tmp/run/LocalDb"));
    }

    #[test]
    fn test_config_validation_ranges() {
        let mut config = HarnessConfig::default();
        config.pool.prepare_thread_count = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.pool.attach_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.pool.schema_databases_count = 65;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.storage.database_folder = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_backoff_order() {
        let mut config = HarnessConfig::default();
        config.pool.retry_backoff_ms = 5_000;
        config.pool.max_retry_backoff_ms = 1_000;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, HarnessError::Validation { .. }));
    }
}
