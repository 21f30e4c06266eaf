//! Postgres-backed stores.
//!
//! Each module holds a row type with its queries as associated functions
//! taking a `&PgPool`, plus the trait impl for [`PgStore`] that converts
//! between rows and domain types.

mod credentials;
mod dlq;
mod idempotency;
mod issuers;
mod jobs;
mod jwks;
mod learners;
mod sync_state;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::DbError;

pub use credentials::ExternalCredentialRow;
pub use dlq::DlqEntryRow;
pub use idempotency::ProcessedCredentialRow;
pub use issuers::IssuerRow;
pub use jobs::CredentialJobRow;
pub use learners::LearnerRow;
pub use sync_state::SyncStateRow;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// One pool shared by every store contract.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the default pool settings.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(DbError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Saturating conversions between domain counters and Postgres integers.
pub(crate) fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

pub(crate) fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub(crate) fn from_i32(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

pub(crate) fn from_i64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}
