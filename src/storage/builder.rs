//! Creates database files from scratch and tears them down again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{HarnessError, Result, ResultExt};
use crate::storage::descriptor::{sqlite_files, DatabaseInstance, DatabaseKind};
use crate::storage::migrations::{EmbeddedSchema, SchemaInstaller};
use crate::storage::pool::{check_connection, open_pool};

const DATABASE_EXTENSION: &str = "sqlite";

/// Materializes empty or schema-initialized SQLite databases in one directory
pub struct DatabaseBuilder {
    root: PathBuf,
    installer: Arc<dyn SchemaInstaller>,
    counter: AtomicU64,
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder").field("root", &self.root).finish()
    }
}

impl DatabaseBuilder {
    /// Builder that installs the embedded schema
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_installer(root, Arc::new(EmbeddedSchema))
    }

    /// Builder with a custom schema installer
    pub fn with_installer(root: impl Into<PathBuf>, installer: Arc<dyn SchemaInstaller>) -> Self {
        Self { root: root.into(), installer, counter: AtomicU64::new(0) }
    }

    /// Directory database files are written to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the database directory, optionally deleting files left behind by
    /// an earlier run.
    pub fn prepare_root(&self, purge: bool) -> Result<usize> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("Creating database directory {}", self.root.display())
        })?;

        if !purge {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Reading database directory {}", self.root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == DATABASE_EXTENSION) {
                for file in sqlite_files(&path) {
                    let _ = std::fs::remove_file(file);
                }
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "Purged stale test databases");
        }
        Ok(removed)
    }

    /// Build a new database of the given kind.
    ///
    /// On failure any partially written files are removed before the error is
    /// returned.
    pub async fn build(&self, kind: DatabaseKind) -> Result<DatabaseInstance> {
        let name = self.unique_name(kind);
        let path = self.root.join(format!("{}.{}", name, DATABASE_EXTENSION));

        match self.initialize(&path, kind).await {
            Ok(()) => {
                debug!(database = %name, kind = %kind, "Built test database");
                Ok(DatabaseInstance::new(name, path, kind))
            }
            Err(e) => {
                remove_files(&path);
                Err(e)
            }
        }
    }

    async fn initialize(&self, path: &Path, kind: DatabaseKind) -> Result<()> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = open_pool(&url, true, 1).await?;

        let result = match kind {
            DatabaseKind::Empty => check_connection(&pool).await,
            DatabaseKind::Schema => self.installer.install(&pool).await,
        };

        pool.close().await;
        result.with_context(|| format!("Initializing {} database {}", kind, path.display()))
    }

    /// Delete a database's files. Missing files are not an error.
    pub async fn destroy(&self, instance: &DatabaseInstance) -> Result<()> {
        for file in instance.files() {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(HarnessError::io(
                        e,
                        format!("Failed to remove database file {}", file.display()),
                    ))
                }
            }
        }
        debug!(database = %instance.name(), "Destroyed test database");
        Ok(())
    }

    fn unique_name(&self, kind: DatabaseKind) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let uuid = Uuid::new_v4().simple().to_string();
        format!("testdb_{}_{}_{}_{}", kind, std::process::id(), counter, &uuid[..8])
    }
}

fn remove_files(path: &Path) {
    for file in sqlite_files(path) {
        if let Err(e) = std::fs::remove_file(&file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %file.display(), error = %e, "Failed to clean up partial database");
            }
        }
    }
}
