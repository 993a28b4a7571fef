//! Stand-ins for the pool and the schema installer.

#![allow(clippy::duplicate_mod)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cms_testdb::storage::{DbPool, EmbeddedSchema, SchemaInstaller};
use cms_testdb::{DatabaseHandle, DatabaseKind, DatabaseProvider, HarnessError, Result};

/// Forwards to a real provider and records every call
pub struct CountingProvider {
    inner: Arc<dyn DatabaseProvider>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    detached: Mutex<Vec<String>>,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn DatabaseProvider>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            detached: Mutex::new(Vec::new()),
        })
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    /// Names of detached databases in detach order
    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseProvider for CountingProvider {
    async fn attach(&self, kind: DatabaseKind) -> Result<DatabaseHandle> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.inner.attach(kind).await
    }

    async fn detach(&self, database: DatabaseHandle) -> Result<()> {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.detached.lock().unwrap().push(database.name().to_string());
        self.inner.detach(database).await
    }
}

/// Claims to install the schema but leaves the database empty
pub struct NoopInstaller;

#[async_trait]
impl SchemaInstaller for NoopInstaller {
    async fn install(&self, _pool: &DbPool) -> Result<()> {
        Ok(())
    }
}

/// Always fails with a non-retryable error
pub struct BrokenInstaller;

#[async_trait]
impl SchemaInstaller for BrokenInstaller {
    async fn install(&self, _pool: &DbPool) -> Result<()> {
        Err(HarnessError::internal("schema scripts are missing"))
    }
}

/// Takes far longer than any attach is willing to wait
pub struct SlowInstaller(pub Duration);

#[async_trait]
impl SchemaInstaller for SlowInstaller {
    async fn install(&self, _pool: &DbPool) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Fails its first `failures` installs, then installs the real schema
pub struct FlakyInstaller {
    failures: usize,
    retryable: bool,
    calls: AtomicUsize,
}

impl FlakyInstaller {
    /// Failures look like a dropped connection, which builders retry
    pub fn retryable(failures: usize) -> Arc<Self> {
        Arc::new(Self { failures, retryable: true, calls: AtomicUsize::new(0) })
    }

    /// Failures end the build cycle on the spot
    pub fn fatal(failures: usize) -> Arc<Self> {
        Arc::new(Self { failures, retryable: false, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaInstaller for FlakyInstaller {
    async fn install(&self, pool: &DbPool) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(if self.retryable {
                HarnessError::database(sqlx::Error::PoolTimedOut, "Applying schema")
            } else {
                HarnessError::internal("transient")
            });
        }
        EmbeddedSchema.install(pool).await
    }
}
