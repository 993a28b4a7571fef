//! # Schema Installation
//!
//! Schema databases are initialized by applying embedded, version-ordered SQL
//! migrations. Each applied migration is recorded in a tracking table so the
//! system under test can tell an installed database from an empty one.

use crate::errors::{HarnessError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqliteConnection};
use tracing::{debug, error, info};

/// Name of the migration tracking table
pub const MIGRATION_TABLE: &str = "__cms_migrations";

/// Migrations compiled into the harness, ordered by filename
const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[
    (
        "20240601000001_create_node_tables",
        include_str!("../../migrations/20240601000001_create_node_tables.sql"),
    ),
    (
        "20240601000002_create_system_tables",
        include_str!("../../migrations/20240601000002_create_system_tables.sql"),
    ),
];

/// How much of the schema a database carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// No tracking table; nothing installed
    Missing,
    /// Some migrations applied, some pending
    Partial { applied: usize, expected: usize },
    /// Every embedded migration applied
    Current,
}

/// Applies the full schema to a freshly created database
#[async_trait]
pub trait SchemaInstaller: Send + Sync + 'static {
    async fn install(&self, pool: &DbPool) -> Result<()>;
}

/// Installs the embedded migrations
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSchema;

#[async_trait]
impl SchemaInstaller for EmbeddedSchema {
    async fn install(&self, pool: &DbPool) -> Result<()> {
        run_migrations(pool).await
    }
}

/// Run all pending embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    create_migration_table(pool).await?;

    let applied = get_applied_migration_versions(pool).await?;

    let mut migrations_run = 0;
    for (filename, sql) in EMBEDDED_MIGRATIONS {
        let version = extract_version_from_filename(filename)?;

        if applied.contains(&version) {
            debug!(version = version, "Migration already applied: {}", filename);
            continue;
        }

        let start_time = std::time::Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| HarnessError::database(e, "Failed to start migration transaction"))?;

        // raw_sql supports multi-statement migration files
        let conn: &mut SqliteConnection = &mut tx;
        conn.execute(sqlx::raw_sql(sql)).await.map_err(|e| {
            error!(error = %e, migration = filename, "Migration failed");
            HarnessError::database(e, format!("Migration failed: {}", filename))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        let checksum = calculate_checksum(sql);
        let now = chrono::Utc::now();

        let record_sql = format!(
            "INSERT INTO {} (version, description, checksum, execution_time, installed_on) \
             VALUES (?, ?, ?, ?, ?)",
            MIGRATION_TABLE
        );
        let record = sqlx::query(&record_sql)
        .bind(version)
        .bind(*filename)
        .bind(&checksum)
        .bind(execution_time)
        .bind(now);
        let conn: &mut SqliteConnection = &mut tx;
        conn.execute(record).await.map_err(|e| {
            error!(error = %e, migration = filename, "Failed to record migration");
            HarnessError::database(e, format!("Failed to record migration: {}", filename))
        })?;

        tx.commit()
            .await
            .map_err(|e| HarnessError::database(e, "Failed to commit migration transaction"))?;

        migrations_run += 1;
        debug!(
            version = version,
            execution_time_ms = execution_time,
            "Migration completed: {}",
            filename
        );
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Schema migrations applied");
    }

    Ok(())
}

/// Report how much of the embedded schema a database carries
pub async fn schema_state(pool: &DbPool) -> Result<SchemaState> {
    if !migration_table_exists(pool).await? {
        return Ok(SchemaState::Missing);
    }

    let applied = get_applied_migration_versions(pool).await?;
    let expected = expected_versions()?;

    if expected.iter().all(|v| applied.contains(v)) {
        Ok(SchemaState::Current)
    } else {
        let applied = expected.iter().filter(|v| applied.contains(v)).count();
        Ok(SchemaState::Partial { applied, expected: expected.len() })
    }
}

/// Count user tables, excluding SQLite internals
pub async fn table_count(pool: &DbPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| HarnessError::database(e, "Failed to count tables"))?;
    Ok(count)
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            checksum BLOB NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
    "#,
        MIGRATION_TABLE
    ))
    .execute(pool)
    .await
    .map_err(|e| HarnessError::database(e, "Failed to create migration tracking table"))?;

    Ok(())
}

async fn migration_table_exists(pool: &DbPool) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(MIGRATION_TABLE)
            .fetch_one(pool)
            .await
            .map_err(|e| HarnessError::database(e, "Failed to inspect sqlite_master"))?;
    Ok(count > 0)
}

async fn get_applied_migration_versions(pool: &DbPool) -> Result<Vec<i64>> {
    let rows = sqlx::query(&format!("SELECT version FROM {} ORDER BY version", MIGRATION_TABLE))
        .fetch_all(pool)
        .await
        .map_err(|e| HarnessError::database(e, "Failed to get applied migrations"))?;

    Ok(rows.into_iter().map(|row| row.get::<i64, _>("version")).collect())
}

fn expected_versions() -> Result<Vec<i64>> {
    EMBEDDED_MIGRATIONS
        .iter()
        .map(|(filename, _)| extract_version_from_filename(filename))
        .collect()
}

/// Extract version number from migration filename
fn extract_version_from_filename(filename: &str) -> Result<i64> {
    let version_str = filename.split('_').next().ok_or_else(|| {
        HarnessError::validation(format!("Invalid migration filename: {}", filename))
    })?;

    version_str
        .parse::<i64>()
        .map_err(|_| HarnessError::validation(format!("Invalid version in filename: {}", filename)))
}

fn calculate_checksum(content: &str) -> Vec<u8> {
    Sha256::digest(content.as_bytes()).to_vec()
}
