//! # Database Connection Management
//!
//! Opens SQLite connection pools against pooled database files and performs
//! the one-time process-wide driver registration.

use crate::errors::{HarnessError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    AnyConnection, Connection, Pool, Sqlite,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

static DRIVER_REGISTRATION: Once = Once::new();
static DRIVER_INSTALLS: AtomicUsize = AtomicUsize::new(0);

/// Register the sqlx `Any` drivers for this process.
///
/// Safe to call from every fixture; only the first call installs anything.
pub fn register_driver() {
    DRIVER_REGISTRATION.call_once(|| {
        sqlx::any::install_default_drivers();
        DRIVER_INSTALLS.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Registered database drivers");
    });
}

/// How many times driver installation actually ran (0 or 1)
pub fn driver_install_count() -> usize {
    DRIVER_INSTALLS.load(Ordering::SeqCst)
}

/// Open a pool for a database file.
///
/// With `create_if_missing` the file is created on first connect, which is how
/// the builder materializes new databases.
pub async fn open_pool(
    connection_string: &str,
    create_if_missing: bool,
    max_connections: u32,
) -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str(connection_string)
        .map_err(|e| {
            HarnessError::database(
                e,
                format!("Invalid SQLite connection string: {}", connection_string),
            )
        })?
        .create_if_missing(create_if_missing)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                url = %connection_string,
                busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
                "Failed to open SQLite database pool"
            );
            HarnessError::database(
                e,
                format!("Failed to connect to database: {}", connection_string),
            )
        })?;

    Ok(pool)
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| HarnessError::database(e, "Database connectivity check failed"))?;

    Ok(())
}

/// Connect once through the driver-agnostic `Any` layer.
///
/// Requires [`register_driver`] to have run.
pub async fn probe(connection_string: &str) -> Result<()> {
    let mut conn = AnyConnection::connect(connection_string)
        .await
        .map_err(|e| HarnessError::database(e, format!("Failed to probe {}", connection_string)))?;
    conn.ping().await.map_err(|e| HarnessError::database(e, "Probe ping failed"))?;
    conn.close().await.map_err(|e| HarnessError::database(e, "Failed to close probe connection"))?;
    Ok(())
}
