//! PostgreSQL persistence and coordination for the lock ledger.
//!
//! Repositories are zero-sized structs whose methods take the caller's
//! `&mut PgConnection`, so every statement runs inside the transaction the
//! caller opened. The [`coordinator`] module builds the acquisition
//! algorithm on top of them.

use sqlx::postgres::PgPoolOptions;

pub mod coordinator;
pub mod error;
pub mod models;
pub mod repositories;

pub use coordinator::{
    coordinator_for, ExecutionStrategy, GetLockOptions, LockCoordinator, PgLockCoordinator,
    StoreCapabilities,
};
pub use error::{LockError, LockResult};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial statement to prove the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded `locks` / `lock_requests` migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
