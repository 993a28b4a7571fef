//! Metadata describing one pooled database.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Provider name handed to the system under test alongside a connection string
pub const SQLITE_PROVIDER: &str = "sqlite";

/// Shared handle to a pooled database
pub type DatabaseHandle = Arc<DatabaseInstance>;

/// How a database was initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// No tables; the system under test sees a fresh install
    Empty,
    /// Full schema applied; the system under test can run immediately
    Schema,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Empty => "empty",
            DatabaseKind::Schema => "schema",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database file produced by the builder.
///
/// Everything except the attached flag is fixed at construction. The flag is
/// flipped only by the pool on attach and detach.
#[derive(Debug)]
pub struct DatabaseInstance {
    name: String,
    path: PathBuf,
    connection_string: String,
    kind: DatabaseKind,
    attached: AtomicBool,
}

impl DatabaseInstance {
    pub(crate) fn new(name: String, path: PathBuf, kind: DatabaseKind) -> Self {
        let connection_string = format!("sqlite://{}?mode=rw", path.display());
        Self {
            name,
            path,
            connection_string,
            kind,
            attached: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection string the system under test should use
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn provider_name(&self) -> &'static str {
        SQLITE_PROVIDER
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Whether the instance is currently checked out of the pool
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Mark attached; returns `false` if it already was
    pub(crate) fn mark_attached(&self) -> bool {
        !self.attached.swap(true, Ordering::AcqRel)
    }

    /// Mark detached; returns `false` if it was not attached
    pub(crate) fn mark_detached(&self) -> bool {
        self.attached.swap(false, Ordering::AcqRel)
    }

    /// Files SQLite may create next to the database
    pub(crate) fn files(&self) -> [PathBuf; 3] {
        sqlite_files(&self.path)
    }
}

/// The database file plus its WAL and shared-memory companions
pub(crate) fn sqlite_files(path: &Path) -> [PathBuf; 3] {
    [path.to_path_buf(), path.with_extension("sqlite-wal"), path.with_extension("sqlite-shm")]
}
