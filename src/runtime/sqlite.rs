//! A SQLite-backed system under test.
//!
//! Small enough to stand in for the content-management runtime in harness
//! tests, but it derives its runtime level from the real database state the
//! same way the full runtime does: no database or no schema means install,
//! a partially migrated schema means upgrade, a current schema means run.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{HarnessError, Result};
use crate::observability::LoggerFactory;
use crate::runtime::{DatabaseFactory, RuntimeLevel, RuntimeState, ServiceContext};
use crate::storage::{open_pool, probe, run_migrations, schema_state, DbPool, SchemaState};
use crate::storage::SQLITE_PROVIDER;

const MAX_CONNECTIONS: u32 = 4;

struct Inner {
    pool: RwLock<Option<DbPool>>,
    level: Mutex<RuntimeLevel>,
    logger: LoggerFactory,
}

/// Runtime state, database factory and service context in one cheap-to-clone handle
#[derive(Clone)]
pub struct SqliteRuntime {
    inner: Arc<Inner>,
}

impl Default for SqliteRuntime {
    fn default() -> Self {
        Self::new(LoggerFactory::mock())
    }
}

impl SqliteRuntime {
    pub fn new(logger: LoggerFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool: RwLock::new(None),
                level: Mutex::new(RuntimeLevel::Unknown),
                logger,
            }),
        }
    }

    /// Connection pool once configured
    pub fn pool(&self) -> Option<DbPool> {
        self.inner.pool.read().ok().and_then(|guard| guard.as_ref().cloned())
    }

    /// Run the installer against the configured database, then re-evaluate
    pub async fn install(&self) -> Result<RuntimeLevel> {
        let pool = self.pool().ok_or_else(|| HarnessError::config("No database configured"))?;
        run_migrations(&pool).await?;
        self.determine_runtime_level().await
    }

    fn set_level(&self, level: RuntimeLevel) {
        if let Ok(mut guard) = self.inner.level.lock() {
            *guard = level;
        }
    }
}

#[async_trait]
impl RuntimeState for SqliteRuntime {
    async fn determine_runtime_level(&self) -> Result<RuntimeLevel> {
        let level = match self.pool() {
            None => RuntimeLevel::Install,
            Some(pool) => match schema_state(&pool).await {
                Ok(SchemaState::Missing) => RuntimeLevel::Install,
                Ok(SchemaState::Partial { .. }) => RuntimeLevel::Upgrade,
                Ok(SchemaState::Current) => RuntimeLevel::Run,
                Err(e) => {
                    warn!(error = %e, "Failed to read schema state");
                    RuntimeLevel::BootFailed
                }
            },
        };

        self.set_level(level);
        debug!(level = %level, "Determined runtime level");
        Ok(level)
    }

    fn level(&self) -> RuntimeLevel {
        self.inner.level.lock().map(|guard| *guard).unwrap_or(RuntimeLevel::Unknown)
    }
}

#[async_trait]
impl DatabaseFactory for SqliteRuntime {
    fn is_configured(&self) -> bool {
        self.pool().is_some()
    }

    async fn configure(&self, connection_string: &str, provider_name: &str) -> Result<()> {
        if provider_name != SQLITE_PROVIDER {
            return Err(HarnessError::validation_field(
                format!("Unsupported database provider '{}'", provider_name),
                "provider_name",
            ));
        }

        probe(connection_string).await?;
        let pool = open_pool(connection_string, false, MAX_CONNECTIONS).await?;

        let previous = match self.inner.pool.write() {
            Ok(mut guard) => guard.replace(pool),
            Err(_) => return Err(HarnessError::internal("Database factory lock poisoned")),
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        self.set_level(RuntimeLevel::Boot);
        debug!(connection_string, "Configured database factory");
        Ok(())
    }
}

impl ServiceContext for SqliteRuntime {
    fn runtime_state(&self) -> Result<Arc<dyn RuntimeState>> {
        Ok(Arc::new(self.clone()))
    }

    fn database_factory(&self) -> Result<Arc<dyn DatabaseFactory>> {
        Ok(Arc::new(self.clone()))
    }

    fn logger_factory(&self) -> Result<LoggerFactory> {
        Ok(self.inner.logger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{register_driver, DatabaseBuilder, DatabaseKind};

    #[tokio::test]
    async fn test_unconfigured_runtime_needs_install() {
        let runtime = SqliteRuntime::default();
        assert!(!runtime.is_configured());
        assert_eq!(runtime.level(), RuntimeLevel::Unknown);
        assert_eq!(runtime.determine_runtime_level().await.unwrap(), RuntimeLevel::Install);
    }

    #[tokio::test]
    async fn test_levels_follow_database_kind() {
        register_driver();
        let dir = tempfile::tempdir().unwrap();
        let builder = DatabaseBuilder::new(dir.path());

        let schema = builder.build(DatabaseKind::Schema).await.unwrap();
        let runtime = SqliteRuntime::default();
        runtime.configure(schema.connection_string(), schema.provider_name()).await.unwrap();
        assert!(runtime.is_configured());
        assert_eq!(runtime.level(), RuntimeLevel::Boot);
        assert_eq!(runtime.determine_runtime_level().await.unwrap(), RuntimeLevel::Run);

        let empty = builder.build(DatabaseKind::Empty).await.unwrap();
        let runtime = SqliteRuntime::default();
        runtime.configure(empty.connection_string(), empty.provider_name()).await.unwrap();
        assert_eq!(runtime.determine_runtime_level().await.unwrap(), RuntimeLevel::Install);

        assert_eq!(runtime.install().await.unwrap(), RuntimeLevel::Run);
        assert_eq!(runtime.level(), RuntimeLevel::Run);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let runtime = SqliteRuntime::default();
        let result = runtime.configure("sqlite://nowhere.sqlite", "mssql").await;
        assert!(matches!(result, Err(HarnessError::Validation { .. })));
        assert!(!runtime.is_configured());
    }
}
