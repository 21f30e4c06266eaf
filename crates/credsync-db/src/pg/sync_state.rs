use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{IssuerId, StoreResult, SyncState, SyncStateStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::PgStore;
use crate::error::store_error;

#[derive(Debug, Clone, FromRow)]
pub struct SyncStateRow {
    pub issuer_id: Uuid,
    pub provider: String,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
}

impl SyncStateRow {
    pub async fn find(pool: &PgPool, issuer_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT issuer_id, provider, last_successful_sync_at
            FROM issuer_sync_state WHERE issuer_id = $1
            ",
        )
        .bind(issuer_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT issuer_id, provider, last_successful_sync_at
            FROM issuer_sync_state
            ORDER BY last_successful_sync_at ASC NULLS FIRST
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Upsert, keeping the later of the stored and given timestamps.
    pub async fn advance(
        pool: &PgPool,
        issuer_id: Uuid,
        provider: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO issuer_sync_state (issuer_id, provider, last_successful_sync_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (issuer_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                last_successful_sync_at = GREATEST(
                    issuer_sync_state.last_successful_sync_at,
                    EXCLUDED.last_successful_sync_at
                ),
                updated_at = now()
            ",
        )
        .bind(issuer_id)
        .bind(provider)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl From<SyncStateRow> for SyncState {
    fn from(row: SyncStateRow) -> Self {
        Self {
            issuer_id: IssuerId::from_uuid(row.issuer_id),
            provider: row.provider,
            last_successful_sync_at: row.last_successful_sync_at,
        }
    }
}

#[async_trait]
impl SyncStateStore for PgStore {
    async fn get_sync_state(&self, issuer_id: IssuerId) -> StoreResult<Option<SyncState>> {
        Ok(SyncStateRow::find(self.pool(), issuer_id.into_uuid())
            .await
            .map_err(store_error)?
            .map(Into::into))
    }

    async fn list_sync_states(&self) -> StoreResult<Vec<SyncState>> {
        Ok(SyncStateRow::list(self.pool())
            .await
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn record_sync(
        &self,
        issuer_id: IssuerId,
        provider: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        SyncStateRow::advance(self.pool(), issuer_id.into_uuid(), provider, at)
            .await
            .map_err(store_error)
    }
}
