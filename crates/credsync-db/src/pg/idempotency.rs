use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{
    CredentialRecordId, IdempotencyKey, IdempotencyRecord, IdempotencyStore, StoreResult,
};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use super::PgStore;
use crate::error::store_error;

#[derive(Debug, Clone, FromRow)]
pub struct ProcessedCredentialRow {
    pub idempotency_key: String,
    pub credential_id: Uuid,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedCredentialRow {
    pub async fn find(pool: &PgPool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM processed_credentials WHERE idempotency_key = $1
            ",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    pub async fn exists(pool: &PgPool, key: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS(SELECT 1 FROM processed_credentials WHERE idempotency_key = $1)
            ",
        )
        .bind(key)
        .fetch_one(pool)
        .await
    }

    /// Returns the number of rows written: 0 when the key was already marked.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        key: &str,
        credential_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            INSERT INTO processed_credentials (idempotency_key, credential_id)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            ",
        )
        .bind(key)
        .bind(credential_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

impl From<ProcessedCredentialRow> for IdempotencyRecord {
    fn from(row: ProcessedCredentialRow) -> Self {
        Self {
            key: IdempotencyKey::from_stored(row.idempotency_key),
            credential_id: CredentialRecordId::from_uuid(row.credential_id),
            processed_at: row.processed_at,
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgStore {
    async fn is_processed(&self, key: &IdempotencyKey) -> StoreResult<bool> {
        ProcessedCredentialRow::exists(self.pool(), key.as_str())
            .await
            .map_err(store_error)
    }

    async fn get_processed(&self, key: &IdempotencyKey) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(ProcessedCredentialRow::find(self.pool(), key.as_str())
            .await
            .map_err(store_error)?
            .map(Into::into))
    }

    async fn mark_processed(
        &self,
        key: &IdempotencyKey,
        credential_id: CredentialRecordId,
    ) -> StoreResult<bool> {
        // The foreign key rejects marks for credentials that were never written.
        let written =
            ProcessedCredentialRow::insert(self.pool(), key.as_str(), credential_id.into_uuid())
                .await
                .map_err(store_error)?;
        Ok(written > 0)
    }
}
