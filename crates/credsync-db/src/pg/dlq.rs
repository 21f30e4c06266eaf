use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{
    DeadLetterStore, DlqEntry, DlqEntryId, IdempotencyKey, JobPayload, NewDlqEntry, Page,
    StoreResult,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{from_i32, from_i64, to_i32, to_i64, PgStore};
use crate::error::{corrupt, store_error};

#[derive(Debug, Clone, FromRow)]
pub struct DlqEntryRow {
    pub id: Uuid,
    pub job_type: String,
    pub job_id: String,
    pub reason: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl DlqEntryRow {
    pub async fn insert(
        pool: &PgPool,
        id: Uuid,
        entry: &NewDlqEntry,
        payload: serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO credential_dlq (id, job_type, job_id, reason, payload, attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(&entry.job_type)
        .bind(entry.job_id.as_str())
        .bind(&entry.reason)
        .bind(payload)
        .bind(to_i32(entry.attempts))
        .fetch_one(pool)
        .await
    }

    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM credential_dlq
            ORDER BY created_at DESC, id
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM credential_dlq WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            DELETE FROM credential_dlq WHERE id = $1
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM credential_dlq
            ",
        )
        .fetch_one(pool)
        .await
    }

    pub fn into_entry(self) -> StoreResult<DlqEntry> {
        let payload: JobPayload = serde_json::from_value(self.payload)
            .map_err(|e| corrupt("credential_dlq.payload", e))?;
        Ok(DlqEntry {
            id: DlqEntryId::from_uuid(self.id),
            job_type: self.job_type,
            job_id: IdempotencyKey::from_stored(self.job_id),
            reason: self.reason,
            payload,
            attempts: from_i32(self.attempts),
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl DeadLetterStore for PgStore {
    async fn add_entry(&self, entry: NewDlqEntry) -> StoreResult<DlqEntry> {
        let payload =
            serde_json::to_value(&entry.payload).map_err(|e| corrupt("dlq payload", e))?;
        DlqEntryRow::insert(self.pool(), Uuid::new_v4(), &entry, payload)
            .await
            .map_err(store_error)?
            .into_entry()
    }

    async fn list_entries(&self, limit: u32, offset: u64) -> StoreResult<Page<DlqEntry>> {
        let rows = DlqEntryRow::list(self.pool(), i64::from(limit), to_i64(offset))
            .await
            .map_err(store_error)?;
        let total = DlqEntryRow::count(self.pool()).await.map_err(store_error)?;
        Ok(Page {
            items: rows
                .into_iter()
                .map(DlqEntryRow::into_entry)
                .collect::<StoreResult<Vec<_>>>()?,
            total: from_i64(total),
        })
    }

    async fn get_entry(&self, id: DlqEntryId) -> StoreResult<Option<DlqEntry>> {
        DlqEntryRow::find(self.pool(), id.into_uuid())
            .await
            .map_err(store_error)?
            .map(DlqEntryRow::into_entry)
            .transpose()
    }

    async fn remove_entry(&self, id: DlqEntryId) -> StoreResult<bool> {
        let affected = DlqEntryRow::delete(self.pool(), id.into_uuid())
            .await
            .map_err(store_error)?;
        Ok(affected > 0)
    }

    async fn count_entries(&self) -> StoreResult<u64> {
        Ok(from_i64(DlqEntryRow::count(self.pool()).await.map_err(store_error)?))
    }
}
