//! # Storage
//!
//! Physical test databases: what they are ([`DatabaseInstance`]), how they are
//! made and destroyed ([`DatabaseBuilder`]), how the schema gets into them
//! ([`migrations`]), and how to connect to them ([`pool`]).

pub mod builder;
pub mod descriptor;
pub mod migrations;
pub mod pool;

pub use builder::DatabaseBuilder;
pub use descriptor::{DatabaseHandle, DatabaseInstance, DatabaseKind, SQLITE_PROVIDER};
pub use migrations::{
    run_migrations, schema_state, table_count, EmbeddedSchema, SchemaInstaller, SchemaState,
};
pub use pool::{check_connection, open_pool, probe, register_driver, DbPool};
