//! Background builders that keep the pools topped up.
//!
//! ```text
//! startup / detach → build queue (unbounded) → N builder workers
//!                                                  ↓
//!                                   DatabaseBuilder::build (with retries)
//!                                                  ↓
//!                                   empty or schema ready queue → attach
//! ```
//!
//! Every worker reads from the same queue. A build failure never stops a
//! worker: it is retried with backoff, and once attempts run out the failure
//! is handed to one waiting attach and the slot goes back on the queue.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::provisioning::manager::PoolShared;
use crate::storage::DatabaseKind;

/// One database the pool still owes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BuildRequest {
    pub kind: DatabaseKind,
}

/// Handle for stopping the builder workers
pub(crate) struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal all workers to stop after their current build
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all workers to finish
    pub async fn join(self) {
        for handle in self.worker_handles {
            let _ = handle.await;
        }
    }
}

/// Spawn `worker_count` builders on the given runtime
pub(crate) fn spawn_workers(
    shared: Arc<PoolShared>,
    build_rx: mpsc::UnboundedReceiver<BuildRequest>,
    worker_count: usize,
    runtime: &Handle,
) -> WorkerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let build_rx = Arc::new(Mutex::new(build_rx));
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let mut shutdown_rx = shutdown_rx.clone();
        let build_rx = Arc::clone(&build_rx);
        let shared = Arc::clone(&shared);

        let handle = runtime.spawn(async move {
            debug!(worker_id, "Database builder worker started");

            loop {
                tokio::select! {
                    request = async {
                        let mut rx = build_rx.lock().await;
                        rx.recv().await
                    } => {
                        match request {
                            Some(request) => fill_slot(&shared, worker_id, request).await,
                            None => break,
                        }
                    }

                    changed = shutdown_rx.changed() => {
                        // A dropped sender means the pool manager is gone
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(worker_id, "Database builder worker stopped");
        });

        handles.push(handle);
    }

    info!(worker_count = handles.len(), "Database builder workers spawned");

    WorkerHandle { shutdown_tx, worker_handles: handles }
}

/// Build one database for the request, retrying retryable failures
async fn fill_slot(shared: &PoolShared, worker_id: usize, request: BuildRequest) {
    let kind = request.kind;
    let max_attempts = shared.config.max_build_attempts.max(1);
    let mut attempt = 1;

    loop {
        if shared.is_closed() {
            return;
        }

        match shared.builder.build(kind).await {
            Ok(database) => {
                debug!(
                    worker_id,
                    database = %database.name(),
                    kind = %kind,
                    attempt,
                    "Database ready"
                );
                shared.publish_ready(database);
                return;
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = shared.config.retry_backoff(attempt);
                warn!(
                    worker_id,
                    kind = %kind,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Database build failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    worker_id,
                    kind = %kind,
                    attempts = attempt,
                    error = %e,
                    "Database build failed, giving up on this attempt cycle"
                );
                shared.publish_failure(
                    kind,
                    format!("build failed after {} attempt(s): {}", attempt, e),
                );

                // Keep the slot alive so the pool recovers once the cause clears
                tokio::time::sleep(shared.config.retry_backoff(max_attempts)).await;
                shared.request_build(kind);
                return;
            }
        }
    }
}
