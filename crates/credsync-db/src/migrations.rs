//! Embedded schema migrations.

use sqlx::PgPool;

use crate::error::DbError;

/// Apply all pending migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)?;

    tracing::info!("Database migrations completed");
    Ok(())
}
