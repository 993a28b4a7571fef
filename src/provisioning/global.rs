//! Process-wide pool shared by every fixture.
//!
//! Test frameworks usually give each test its own async runtime, and tasks
//! die with the runtime that spawned them. The shared pool's builders run on
//! a dedicated runtime owned by this module so they outlive any single test.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::provisioning::manager::PoolManager;

static BUILDER_RUNTIME: OnceLock<Runtime> = OnceLock::new();

static SHARED_POOL: LazyPool = LazyPool::new();

/// A pool built at most once, on first use
pub struct LazyPool {
    cell: OnceCell<Arc<PoolManager>>,
}

impl Default for LazyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyPool {
    pub const fn new() -> Self {
        Self { cell: OnceCell::const_new() }
    }

    /// Return the pool, running `init` if nobody has built it yet.
    ///
    /// Concurrent callers wait on the same initialization. If `init` fails
    /// the cell stays empty and the next caller tries again.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<PoolManager>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<PoolManager>>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }

    /// The pool if it has been built
    pub fn get(&self) -> Option<Arc<PoolManager>> {
        self.cell.get().cloned()
    }
}

fn builder_runtime(worker_threads: usize) -> Result<&'static Runtime> {
    if let Some(runtime) = BUILDER_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("testdb-builder")
        .enable_all()
        .build()
        .map_err(|e| HarnessError::io(e, "Failed to start database builder runtime"))?;

    // Only reached from inside the shared pool's one-time initialization
    Ok(BUILDER_RUNTIME.get_or_init(|| runtime))
}

/// The process-wide pool, started from [`HarnessConfig::load`] on first call
pub async fn shared_pool() -> Result<Arc<PoolManager>> {
    SHARED_POOL
        .get_or_try_init(|| async {
            let config = HarnessConfig::load()?;
            let runtime = builder_runtime(config.pool.prepare_thread_count)?;
            let pool = PoolManager::from_config(&config, runtime.handle())?;
            info!(
                database_directory = %config.storage.database_directory().display(),
                "Shared database pool created"
            );
            Ok(pool)
        })
        .await
}

/// The process-wide pool if a fixture has already created it
pub fn shared_pool_if_started() -> Option<Arc<PoolManager>> {
    SHARED_POOL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::storage::DatabaseBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lazy_pool_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let lazy = Arc::new(LazyPool::new());
        let inits = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lazy = Arc::clone(&lazy);
            let inits = Arc::clone(&inits);
            let root = root.clone();
            tasks.push(tokio::spawn(async move {
                lazy.get_or_try_init(|| async move {
                    inits.fetch_add(1, Ordering::SeqCst);
                    let config = PoolConfig {
                        prepare_thread_count: 1,
                        empty_databases_count: 0,
                        schema_databases_count: 0,
                        ..Default::default()
                    };
                    PoolManager::start(config, DatabaseBuilder::new(root), true, &Handle::current())
                })
                .await
                .unwrap()
            }));
        }

        let mut pools = Vec::new();
        for task in tasks {
            pools.push(task.await.unwrap());
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
        pools[0].shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_init_leaves_cell_empty() {
        let lazy = LazyPool::new();
        let result = lazy
            .get_or_try_init(|| async { Err(HarnessError::config("no pool for you")) })
            .await;
        assert!(result.is_err());
        assert!(lazy.get().is_none());
    }
}
