//! Relay durable storage layer.
//!
//! Exposes the abstract [`store`] traits the dispatch engine runs
//! against, the Postgres implementations in [`repositories`], the
//! in-memory implementations in [`memory`] used by tests, and pool /
//! migration helpers for the binary entrypoint.

pub mod lock;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;

/// Shared Postgres connection pool.
pub type DbPool = sqlx::PgPool;

/// Default maximum number of pooled connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Create a connection pool for the given database URL.
///
/// Pool size is overridable via `DATABASE_MAX_CONNECTIONS`.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONNECTIONS);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
