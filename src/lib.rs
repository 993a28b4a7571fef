//! # cms-testdb
//!
//! Database pooling and isolation for content-management integration tests.
//!
//! Building a database with the full schema is slow. This crate keeps a pool
//! of pre-built SQLite databases, some empty and some with the schema already
//! installed, topped up by background builders while tests run. Each test
//! fixture declares how isolated its tests must be and a per-fixture
//! coordinator attaches, configures and releases databases accordingly.
//!
//! ## Architecture
//!
//! ```text
//! TestLifecycleCoordinator → isolation::resolve → PoolManager → ready queues
//!          ↓                                           ↑
//!   system under test                       builder workers → DatabaseBuilder
//!   (DatabaseFactory, RuntimeState)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cms_testdb::{
//!     FixtureOptions, IsolationPolicy, Result, SqliteRuntime, TestLifecycleCoordinator,
//! };
//!
//! # async fn run() -> Result<()> {
//! let mut fixture = TestLifecycleCoordinator::new(
//!     "ContentServiceTests",
//!     FixtureOptions::new(IsolationPolicy::NewSchemaPerTest),
//! );
//!
//! fixture.before_test("can_save_content")?;
//! let runtime = SqliteRuntime::default();
//! let database = fixture.configure(&runtime).await?;
//! assert!(database.is_some());
//!
//! fixture.after_test().await.into_result()?;
//! fixture.after_fixture().await.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod isolation;
pub mod lifecycle;
pub mod observability;
pub mod provisioning;
pub mod runtime;
pub mod storage;

// Re-export commonly used types and traits
pub use config::HarnessConfig;
pub use errors::{ErrorCategory, HarnessError, Result};
pub use isolation::IsolationPolicy;
pub use lifecycle::{FixtureOptions, TeardownAction, TestLifecycleCoordinator};
pub use observability::{LoggerFactory, LoggerKind};
pub use provisioning::{shared_pool, DatabaseProvider, PoolManager};
pub use runtime::{RuntimeLevel, SqliteRuntime};
pub use storage::{DatabaseHandle, DatabaseKind};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "cms-testdb");
    }
}
