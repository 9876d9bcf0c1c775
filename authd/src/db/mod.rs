//! Database module for PostgreSQL connection management.

use crate::config::DatabaseConfig;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Apply every pending migration.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    MIGRATOR.run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Revert the most recently applied migration. Returns its version, or
/// `None` when nothing is applied.
pub async fn revert_last_migration(
    pool: &PgPool,
) -> Result<Option<i64>, sqlx::migrate::MigrateError> {
    let applied: Vec<i64> = sqlx::query_scalar(
        "SELECT version FROM _sqlx_migrations WHERE success ORDER BY version DESC LIMIT 2",
    )
    .fetch_all(pool)
    .await?;

    let Some(&last) = applied.first() else {
        tracing::info!("No applied migrations to revert");
        return Ok(None);
    };
    let target = applied.get(1).copied().unwrap_or(0);

    tracing::info!(version = last, "Reverting database migration");
    MIGRATOR.undo(pool, target).await?;
    tracing::info!(version = last, "Database migration reverted");

    Ok(Some(last))
}

/// Versions and descriptions of the migrations compiled into this binary.
pub fn known_migrations() -> Vec<(i64, String)> {
    MIGRATOR
        .iter()
        .filter(|m| m.migration_type.is_up_migration())
        .map(|m| (m.version, m.description.to_string()))
        .collect()
}
