use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{
    CredentialJob, EnqueueOutcome, IdempotencyKey, JobId, JobPayload, JobQueue, JobStatus,
    NewCredentialJob, QueueDepth, StoreError, StoreResult,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{from_i32, from_i64, to_i32, PgStore};
use crate::error::{corrupt, store_error};

#[derive(Debug, Clone, FromRow)]
pub struct CredentialJobRow {
    pub id: Uuid,
    pub idempotency_key: String,
    pub provider: String,
    pub issuer_id: Uuid,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialJobRow {
    /// Insert a pending job. `None` when an active job holds the key.
    pub async fn insert(
        pool: &PgPool,
        id: Uuid,
        job: &NewCredentialJob,
        payload: serde_json::Value,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r"
            INSERT INTO credential_jobs (
                id, idempotency_key, provider, issuer_id, payload, status, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            ON CONFLICT (idempotency_key) WHERE status IN ('pending', 'processing') DO NOTHING
            RETURNING id
            ",
        )
        .bind(id)
        .bind(job.idempotency_key.as_str())
        .bind(&job.payload.provider)
        .bind(job.payload.issuer_id.into_uuid())
        .bind(payload)
        .bind(to_i32(job.max_attempts))
        .fetch_optional(pool)
        .await
    }

    /// Claim due jobs. Concurrent claimers skip each other's rows.
    pub async fn claim_due(
        pool: &PgPool,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE credential_jobs
            SET status = 'processing', attempts = attempts + 1, updated_at = now()
            WHERE id IN (
                SELECT id FROM credential_jobs
                WHERE status = 'pending' AND run_at <= $1
                ORDER BY run_at ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE credential_jobs
            SET status = $2, last_error = COALESCE($3, last_error), updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn reschedule(
        pool: &PgPool,
        id: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE credential_jobs
            SET status = 'pending', run_at = $2, last_error = $3, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(run_at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn release_stale(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE credential_jobs
            SET status = 'pending', run_at = now(), updated_at = now()
            WHERE status = 'processing' AND updated_at < $1
            ",
        )
        .bind(older_than)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT status, COUNT(*) FROM credential_jobs
            WHERE status IN ('pending', 'processing', 'dead')
            GROUP BY status
            ",
        )
        .fetch_all(pool)
        .await
    }

    pub fn into_job(self) -> StoreResult<CredentialJob> {
        let payload: JobPayload = serde_json::from_value(self.payload)
            .map_err(|e| corrupt("credential_jobs.payload", e))?;
        Ok(CredentialJob {
            id: JobId::from_uuid(self.id),
            idempotency_key: IdempotencyKey::from_stored(self.idempotency_key),
            payload,
            status: self
                .status
                .parse()
                .map_err(|e| corrupt("credential_jobs.status", e))?,
            attempts: from_i32(self.attempts),
            max_attempts: from_i32(self.max_attempts),
            last_error: self.last_error,
            run_at: self.run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn require_row(affected: u64, id: JobId) -> StoreResult<()> {
    if affected == 0 {
        return Err(StoreError::not_found("job", id));
    }
    Ok(())
}

#[async_trait]
impl JobQueue for PgStore {
    async fn enqueue(&self, job: NewCredentialJob) -> StoreResult<EnqueueOutcome> {
        let payload =
            serde_json::to_value(&job.payload).map_err(|e| corrupt("job payload", e))?;
        let inserted = CredentialJobRow::insert(self.pool(), Uuid::new_v4(), &job, payload)
            .await
            .map_err(store_error)?;
        Ok(match inserted {
            Some(id) => EnqueueOutcome::Enqueued(JobId::from_uuid(id)),
            None => EnqueueOutcome::Duplicate,
        })
    }

    async fn claim_due(&self, limit: u32, now: DateTime<Utc>) -> StoreResult<Vec<CredentialJob>> {
        CredentialJobRow::claim_due(self.pool(), i64::from(limit), now)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(CredentialJobRow::into_job)
            .collect()
    }

    async fn complete(&self, id: JobId) -> StoreResult<()> {
        let affected = CredentialJobRow::set_status(self.pool(), id.into_uuid(), JobStatus::Completed, None)
            .await
            .map_err(store_error)?;
        require_row(affected, id)
    }

    async fn schedule_retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        let affected = CredentialJobRow::reschedule(self.pool(), id.into_uuid(), run_at, error)
            .await
            .map_err(store_error)?;
        require_row(affected, id)
    }

    async fn mark_dead(&self, id: JobId, error: &str) -> StoreResult<()> {
        let affected =
            CredentialJobRow::set_status(self.pool(), id.into_uuid(), JobStatus::Dead, Some(error))
                .await
                .map_err(store_error)?;
        require_row(affected, id)
    }

    async fn release_stale(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        CredentialJobRow::release_stale(self.pool(), older_than)
            .await
            .map_err(store_error)
    }

    async fn depth(&self) -> StoreResult<QueueDepth> {
        let rows = CredentialJobRow::count_by_status(self.pool())
            .await
            .map_err(store_error)?;
        let mut depth = QueueDepth::default();
        for (status, n) in rows {
            match status.as_str() {
                "pending" => depth.pending = from_i64(n),
                "processing" => depth.processing = from_i64(n),
                "dead" => depth.dead = from_i64(n),
                _ => {}
            }
        }
        Ok(depth)
    }
}
