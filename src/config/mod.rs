//! # Configuration Management
//!
//! Harness configuration is layered: compiled defaults, then a `.env` file if
//! present, then `TESTDB_`-prefixed environment variables with `__` separating
//! nested keys (for example `TESTDB_POOL__PREPARE_THREAD_COUNT=8`).

mod settings;

pub use settings::{HarnessConfig, LoggingConfig, PoolConfig, StorageConfig};

use crate::errors::Result;

/// Environment variable prefix for harness settings
pub const ENV_PREFIX: &str = "TESTDB";

impl HarnessConfig {
    /// Load configuration from defaults, `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from defaults overlaid with the given environment source
    pub fn from_environment(environment: config::Environment) -> Result<Self> {
        let loaded: HarnessConfig = config::Config::builder()
            .add_source(config::Config::try_from(&HarnessConfig::default())?)
            .add_source(environment.prefix_separator("_").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;

        tracing::debug!(
            prepare_thread_count = loaded.pool.prepare_thread_count,
            empty_databases_count = loaded.pool.empty_databases_count,
            schema_databases_count = loaded.pool.schema_databases_count,
            database_directory = %loaded.storage.database_directory().display(),
            "Loaded harness configuration"
        );

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LoggerKind;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: config::Map<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = HarnessConfig::from_environment(environment(&[])).unwrap();
        assert_eq!(config.pool.prepare_thread_count, 4);
        assert_eq!(config.storage.database_folder, "LocalDb");
        assert_eq!(config.logging.default_logger, LoggerKind::Mock);
    }

    #[test]
    fn test_nested_overrides() {
        let config = HarnessConfig::from_environment(environment(&[
            ("TESTDB_POOL__PREPARE_THREAD_COUNT", "8"),
            ("TESTDB_POOL__SCHEMA_DATABASES_COUNT", "1"),
            ("TESTDB_STORAGE__WORKING_DIRECTORY", "/tmp/harness"),
            ("TESTDB_LOGGING__DEFAULT_LOGGER", "console"),
        ]))
        .unwrap();

        assert_eq!(config.pool.prepare_thread_count, 8);
        assert_eq!(config.pool.schema_databases_count, 1);
        assert_eq!(config.pool.empty_databases_count, 2);
        assert_eq!(config.storage.working_directory, std::path::PathBuf::from("/tmp/harness"));
        assert_eq!(config.logging.default_logger, LoggerKind::Console);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let result = HarnessConfig::from_environment(environment(&[(
            "TESTDB_POOL__PREPARE_THREAD_COUNT",
            "0",
        )]));
        assert!(result.is_err());
    }
}
