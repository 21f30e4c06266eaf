//! Mapping from sqlx failures to [`StoreError`].

use credsync_core::StoreError;
use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Classify a query error for the pipeline.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION | CHECK_VIOLATION) => {
                return StoreError::Constraint(db.message().to_string());
            }
            _ => {}
        }
    }
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        }
        other => StoreError::unavailable("query failed", other),
    }
}

pub(crate) fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {detail}"))
}
