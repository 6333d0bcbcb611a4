//! `PostgreSQL` persistence for the progression orchestrator.
//!
//! This crate provides:
//!
//! - [`PostgresProgressStore`]: the `ProgressStore` implementation, with
//!   compare-and-transition executed under a `SELECT ... FOR UPDATE` row lock
//! - [`PostgresSimulationLog`]: the append-only `SimulationLog`
//! - [`connect`] and [`migrate`] helpers shared by both
//!
//! # Example
//!
//! ```no_run
//! use progression_postgres::{PostgresProgressStore, PostgresSimulationLog, connect, migrate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/progression", 10, Duration::from_secs(5)).await?;
//! migrate(&pool).await?;
//!
//! let store = PostgresProgressStore::new(pool.clone());
//! let log = PostgresSimulationLog::new(pool);
//! # Ok(())
//! # }
//! ```

mod progress_store;
mod simulation_log;

pub use progress_store::PostgresProgressStore;
pub use simulation_log::PostgresSimulationLog;

use progression_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the database is unreachable within
/// `connect_timeout`.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create or upgrade the `stage_progress` and `simulation_logs` tables.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
    Ok(())
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_db_int(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Database(format!("{column} value {value} exceeds i32::MAX")))
}

fn from_db_int(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Database(format!("{column} value {value} is negative")))
}

fn from_db_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
