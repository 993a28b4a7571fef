//! Pools rooted in their own temporary directory.

#![allow(clippy::duplicate_mod)]

use std::sync::Arc;
use std::time::Duration;

use cms_testdb::config::PoolConfig;
use cms_testdb::storage::{DatabaseBuilder, SchemaInstaller};
use cms_testdb::{DatabaseKind, PoolManager};
use tempfile::TempDir;
use tokio::runtime::Handle;

/// A pool whose database directory is deleted with it
pub struct TestPool {
    pub pool: Arc<PoolManager>,
    pub dir: TempDir,
}

impl TestPool {
    /// Pool with the embedded schema and the given sizing
    pub fn new(empty: usize, schema: usize, threads: usize) -> Self {
        Self::with_config(config(empty, schema, threads))
    }

    pub fn with_config(config: PoolConfig) -> Self {
        let dir = tempfile::tempdir().expect("create pool directory");
        let builder = DatabaseBuilder::new(dir.path().join("LocalDb"));
        Self::start(config, builder, dir)
    }

    /// Pool whose schema databases are built by `installer`
    pub fn with_installer(config: PoolConfig, installer: Arc<dyn SchemaInstaller>) -> Self {
        let dir = tempfile::tempdir().expect("create pool directory");
        let builder = DatabaseBuilder::with_installer(dir.path().join("LocalDb"), installer);
        Self::start(config, builder, dir)
    }

    fn start(config: PoolConfig, builder: DatabaseBuilder, dir: TempDir) -> Self {
        let pool = PoolManager::start(config, builder, true, &Handle::current())
            .expect("start test pool");
        Self { pool, dir }
    }

    /// Wait until the pool holds at least `count` ready databases of `kind`
    pub async fn wait_for_ready(&self, kind: DatabaseKind, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while self.pool.stats().ready(kind) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "pool never reached {} ready {} databases: {:?}",
                count,
                kind,
                self.pool.stats()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Number of database files currently on disk
    pub fn database_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("LocalDb"))
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sqlite"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

/// Small, fast pool sizing for tests
pub fn config(empty: usize, schema: usize, threads: usize) -> PoolConfig {
    PoolConfig {
        prepare_thread_count: threads,
        empty_databases_count: empty,
        schema_databases_count: schema,
        attach_timeout_seconds: 30,
        max_build_attempts: 2,
        retry_backoff_ms: 10,
        max_retry_backoff_ms: 50,
    }
}
