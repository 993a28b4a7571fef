//! # Pool Manager
//!
//! Owns two pools of ready databases, one empty and one schema-initialized,
//! and hands them out to fixtures. Background builders keep each pool at its
//! target size; a detached database is destroyed and its slot rebuilt.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn, Instrument};
use validator::Validate;

use crate::config::{HarnessConfig, PoolConfig};
use crate::errors::{HarnessError, Result};
use crate::pool_span;
use crate::provisioning::worker::{spawn_workers, BuildRequest, WorkerHandle};
use crate::storage::{DatabaseBuilder, DatabaseHandle, DatabaseInstance, DatabaseKind};

/// Source of databases for fixtures
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Check out a ready database of the given kind
    async fn attach(&self, kind: DatabaseKind) -> Result<DatabaseHandle>;

    /// Return a database; it is destroyed and will not be handed out again
    async fn detach(&self, database: DatabaseHandle) -> Result<()>;

    async fn attach_schema(&self) -> Result<DatabaseHandle> {
        self.attach(DatabaseKind::Schema).await
    }

    async fn attach_empty(&self) -> Result<DatabaseHandle> {
        self.attach(DatabaseKind::Empty).await
    }
}

/// Why the builders gave up on a slot
#[derive(Debug)]
struct BuildFailure {
    /// Successful builds of the kind published before this failure
    epoch: u64,
    message: String,
}

/// A finished build, or why the builders gave up on one
type Provisioned = std::result::Result<DatabaseInstance, BuildFailure>;

struct ReadyQueue {
    kind: DatabaseKind,
    target: usize,
    tx: mpsc::UnboundedSender<Provisioned>,
    rx: Mutex<mpsc::UnboundedReceiver<Provisioned>>,
    ready: AtomicUsize,
    failure_pending: AtomicBool,
    epoch: AtomicU64,
}

impl ReadyQueue {
    fn new(kind: DatabaseKind, target: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kind,
            target,
            tx,
            rx: Mutex::new(rx),
            ready: AtomicUsize::new(0),
            failure_pending: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    /// A failure is stale once a later build of the same kind succeeded
    fn is_stale(&self, failure: &BuildFailure) -> bool {
        failure.epoch < self.epoch.load(Ordering::Acquire)
    }
}

/// State shared between the manager and its builder workers
pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    pub(crate) builder: DatabaseBuilder,
    build_tx: mpsc::UnboundedSender<BuildRequest>,
    empty: ReadyQueue,
    schema: ReadyQueue,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    attached: AtomicUsize,
    built: AtomicUsize,
    failed_builds: AtomicUsize,
}

impl PoolShared {
    fn queue(&self, kind: DatabaseKind) -> &ReadyQueue {
        match kind {
            DatabaseKind::Empty => &self.empty,
            DatabaseKind::Schema => &self.schema,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn request_build(&self, kind: DatabaseKind) {
        if self.is_closed() {
            return;
        }
        if self.build_tx.send(BuildRequest { kind }).is_err() {
            warn!(kind = %kind, "Build queue closed, dropping rebuild request");
        }
    }

    pub(crate) fn publish_ready(&self, database: DatabaseInstance) {
        let queue = self.queue(database.kind());
        self.built.fetch_add(1, Ordering::Relaxed);
        queue.ready.fetch_add(1, Ordering::AcqRel);
        queue.epoch.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(Ok(database))) = queue.tx.send(Ok(database)) {
            queue.ready.fetch_sub(1, Ordering::AcqRel);
            warn!(database = %database.name(), "Ready queue closed, discarding database");
        }
    }

    /// Hand a build failure to the next attach of this kind. At most one
    /// failure is outstanding per kind so a persistent fault cannot flood the
    /// queue. A failure followed by a successful build of the same kind is
    /// skipped by attach.
    pub(crate) fn publish_failure(&self, kind: DatabaseKind, message: String) {
        self.failed_builds.fetch_add(1, Ordering::Relaxed);
        let queue = self.queue(kind);
        if queue.failure_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let failure = BuildFailure { epoch: queue.epoch.load(Ordering::Acquire), message };
        if queue.tx.send(Err(failure)).is_err() {
            queue.failure_pending.store(false, Ordering::Release);
            warn!(kind = %kind, "Ready queue closed, dropping build failure");
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Empty databases built and waiting
    pub empty_ready: usize,
    /// Schema databases built and waiting
    pub schema_ready: usize,
    /// Databases currently checked out
    pub attached: usize,
    /// Databases built since start
    pub built: usize,
    /// Build cycles that exhausted their attempts
    pub failed_builds: usize,
}

impl PoolStats {
    pub fn ready(&self, kind: DatabaseKind) -> usize {
        match kind {
            DatabaseKind::Empty => self.empty_ready,
            DatabaseKind::Schema => self.schema_ready,
        }
    }
}

/// The pool of ready databases plus the workers that fill it
pub struct PoolManager {
    shared: Arc<PoolShared>,
    workers: std::sync::Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("root", &self.shared.builder.root())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolManager {
    /// Start a pool from the full harness configuration
    pub fn from_config(config: &HarnessConfig, runtime: &Handle) -> Result<Arc<Self>> {
        config.validate()?;
        let builder = DatabaseBuilder::new(config.storage.database_directory());
        Self::start(config.pool.clone(), builder, config.storage.purge_on_start, runtime)
    }

    /// Prepare the database directory, queue the initial builds and spawn
    /// `prepare_thread_count` builder workers on `runtime`.
    pub fn start(
        config: PoolConfig,
        builder: DatabaseBuilder,
        purge: bool,
        runtime: &Handle,
    ) -> Result<Arc<Self>> {
        Validate::validate(&config).map_err(HarnessError::from)?;
        builder.prepare_root(purge)?;

        let (build_tx, build_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            empty: ReadyQueue::new(DatabaseKind::Empty, config.empty_databases_count),
            schema: ReadyQueue::new(DatabaseKind::Schema, config.schema_databases_count),
            config,
            builder,
            build_tx,
            closed: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
            attached: AtomicUsize::new(0),
            built: AtomicUsize::new(0),
            failed_builds: AtomicUsize::new(0),
        });

        for queue in [&shared.schema, &shared.empty] {
            for _ in 0..queue.target {
                shared.request_build(queue.kind);
            }
        }

        let workers = spawn_workers(
            Arc::clone(&shared),
            build_rx,
            shared.config.prepare_thread_count,
            runtime,
        );

        info!(
            root = %shared.builder.root().display(),
            prepare_thread_count = shared.config.prepare_thread_count,
            empty_databases_count = shared.empty.target,
            schema_databases_count = shared.schema.target,
            attach_timeout_secs = shared.config.attach_timeout_seconds,
            "Database pool started"
        );

        Ok(Arc::new(Self { shared, workers: std::sync::Mutex::new(Some(workers)) }))
    }

    /// Current pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            empty_ready: self.shared.empty.ready.load(Ordering::Acquire),
            schema_ready: self.shared.schema.ready.load(Ordering::Acquire),
            attached: self.shared.attached.load(Ordering::Acquire),
            built: self.shared.built.load(Ordering::Relaxed),
            failed_builds: self.shared.failed_builds.load(Ordering::Relaxed),
        }
    }

    /// Pool sizing this manager runs with
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Stop the builders and destroy every database still waiting in a pool.
    ///
    /// Attached databases stay valid; detaching them later destroys them
    /// without queueing a rebuild.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake attaches still waiting so they release the ready queues
        self.shared.closed_tx.send_replace(true);

        let workers = self.workers.lock().ok().and_then(|mut guard| guard.take());
        if let Some(workers) = workers {
            workers.shutdown();
            workers.join().await;
        }

        let mut destroyed = 0;
        for queue in [&self.shared.empty, &self.shared.schema] {
            let mut rx = queue.rx.lock().await;
            while let Ok(provisioned) = rx.try_recv() {
                if let Ok(database) = provisioned {
                    queue.ready.fetch_sub(1, Ordering::AcqRel);
                    if let Err(e) = self.shared.builder.destroy(&database).await {
                        warn!(
                            database = %database.name(),
                            error = %e,
                            "Failed to destroy pooled database"
                        );
                    }
                    destroyed += 1;
                }
            }
        }

        info!(destroyed, "Database pool shut down");
    }

    async fn attach_inner(&self, kind: DatabaseKind) -> Result<DatabaseHandle> {
        let queue = self.shared.queue(kind);

        if self.shared.is_closed() {
            return Err(HarnessError::provisioning(kind, "database pool has shut down"));
        }
        if queue.target == 0 {
            return Err(HarnessError::provisioning(
                kind,
                format!("pool is configured with no {} databases", kind),
            ));
        }

        let timeout = self.shared.config.attach_timeout();
        let started = Instant::now();
        let mut closed_rx = self.shared.closed_tx.subscribe();
        let received = tokio::time::timeout(timeout, async {
            tokio::select! {
                received = async {
                    let mut rx = queue.rx.lock().await;
                    loop {
                        match rx.recv().await {
                            Some(Err(failure)) if queue.is_stale(&failure) => {
                                queue.failure_pending.store(false, Ordering::Release);
                                debug!(
                                    kind = %kind,
                                    error = %failure.message,
                                    "Skipping build failure superseded by a later build"
                                );
                            }
                            received => break received,
                        }
                    }
                } => received,
                _ = closed_rx.wait_for(|closed| *closed) => None,
            }
        })
        .await;

        let database = match received {
            Err(_) => {
                return Err(HarnessError::timeout(
                    format!("attach {} database", kind),
                    timeout.as_millis() as u64,
                ))
            }
            Ok(None) => {
                return Err(HarnessError::provisioning(kind, "database pool has shut down"));
            }
            Ok(Some(Err(failure))) => {
                queue.failure_pending.store(false, Ordering::Release);
                return Err(HarnessError::provisioning(kind, failure.message));
            }
            Ok(Some(Ok(database))) => database,
        };

        queue.ready.fetch_sub(1, Ordering::AcqRel);
        let database = Arc::new(database);
        database.mark_attached();
        self.shared.attached.fetch_add(1, Ordering::AcqRel);

        debug!(
            database = %database.name(),
            waited_ms = started.elapsed().as_millis() as u64,
            "Attached database"
        );
        Ok(database)
    }

    async fn detach_inner(&self, database: DatabaseHandle) -> Result<()> {
        if !database.mark_detached() {
            debug!(database = %database.name(), "Database already detached");
            return Ok(());
        }
        self.shared.attached.fetch_sub(1, Ordering::AcqRel);

        let result = self.shared.builder.destroy(&database).await;
        self.shared.request_build(database.kind());

        debug!(database = %database.name(), "Detached database");
        result
    }
}

#[async_trait]
impl DatabaseProvider for PoolManager {
    async fn attach(&self, kind: DatabaseKind) -> Result<DatabaseHandle> {
        self.attach_inner(kind).instrument(pool_span!("attach", kind)).await
    }

    async fn detach(&self, database: DatabaseHandle) -> Result<()> {
        let span = pool_span!("detach", database.kind(), database = %database.name());
        self.detach_inner(database).instrument(span).await
    }
}
