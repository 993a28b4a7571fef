//! # System Under Test Collaborators
//!
//! The harness never talks to the content-management runtime directly. It
//! resolves these services from a [`ServiceContext`], points the database
//! factory at a pooled database, and reads back the runtime level to check
//! that the database is in the state the isolation policy promised.

pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::observability::LoggerFactory;

pub use sqlite::SqliteRuntime;

/// Readiness reported by the system under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeLevel {
    Unknown,
    /// Connected to a database whose state has not been evaluated yet
    Boot,
    /// No usable database; an install must run first
    Install,
    /// Schema present but behind the current version
    Upgrade,
    /// Ready to serve
    Run,
    BootFailed,
}

impl fmt::Display for RuntimeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeLevel::Unknown => "Unknown",
            RuntimeLevel::Boot => "Boot",
            RuntimeLevel::Install => "Install",
            RuntimeLevel::Upgrade => "Upgrade",
            RuntimeLevel::Run => "Run",
            RuntimeLevel::BootFailed => "BootFailed",
        };
        f.write_str(name)
    }
}

/// Tracks the runtime level of the system under test
#[async_trait]
pub trait RuntimeState: Send + Sync {
    /// Re-evaluate the level from the current configuration and database
    async fn determine_runtime_level(&self) -> Result<RuntimeLevel>;

    /// Level from the last evaluation
    fn level(&self) -> RuntimeLevel;
}

/// Owns the system under test's database connection
#[async_trait]
pub trait DatabaseFactory: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn configure(&self, connection_string: &str, provider_name: &str) -> Result<()>;
}

/// Resolves the services the harness needs from a live system under test
pub trait ServiceContext: Send + Sync {
    fn runtime_state(&self) -> Result<Arc<dyn RuntimeState>>;

    fn database_factory(&self) -> Result<Arc<dyn DatabaseFactory>>;

    fn logger_factory(&self) -> Result<LoggerFactory>;
}
