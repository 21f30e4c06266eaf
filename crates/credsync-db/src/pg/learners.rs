use async_trait::async_trait;
use chrono::NaiveDate;
use credsync_core::{LearnerCandidate, LearnerDirectory, LearnerId, StoreResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::PgStore;
use crate::error::store_error;

/// Upper bound on rows returned by the exact-match lookups. Callers only
/// care whether there is exactly one.
const EXACT_LOOKUP_LIMIT: i64 = 2;

#[derive(Debug, Clone, FromRow)]
pub struct LearnerRow {
    pub id: Uuid,
    pub name: String,
    pub dob: Option<NaiveDate>,
}

impl LearnerRow {
    pub async fn find_id_by_email(pool: &PgPool, email: &str) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT id FROM learners
            WHERE lower(email) = lower($1)
            ORDER BY created_at ASC
            LIMIT 1
            ",
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_ids_by_alternate_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT id FROM learners
            WHERE EXISTS (
                SELECT 1 FROM unnest(alternate_emails) AS alt WHERE lower(alt) = lower($1)
            )
            ORDER BY created_at ASC
            LIMIT $2
            ",
        )
        .bind(email)
        .bind(EXACT_LOOKUP_LIMIT)
        .fetch_all(pool)
        .await
    }

    pub async fn find_ids_by_phone_suffix(
        pool: &PgPool,
        digits: &str,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT id FROM learners
            WHERE length(regexp_replace(coalesce(phone, ''), '\D', '', 'g')) >= 10
              AND right(regexp_replace(coalesce(phone, ''), '\D', '', 'g'), 10) = $1
            ORDER BY created_at ASC
            LIMIT $2
            ",
        )
        .bind(digits)
        .bind(EXACT_LOOKUP_LIMIT)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_dob_range(
        pool: &PgPool,
        from: NaiveDate,
        to: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT id, name, dob FROM learners
            WHERE dob BETWEEN $1 AND $2
            ORDER BY dob ASC, created_at ASC
            LIMIT $3
            ",
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[async_trait]
impl LearnerDirectory for PgStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LearnerId>> {
        Ok(LearnerRow::find_id_by_email(self.pool(), email)
            .await
            .map_err(store_error)?
            .map(LearnerId::from_uuid))
    }

    async fn find_by_alternate_email(&self, email: &str) -> StoreResult<Vec<LearnerId>> {
        Ok(LearnerRow::find_ids_by_alternate_email(self.pool(), email)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(LearnerId::from_uuid)
            .collect())
    }

    async fn find_by_phone_suffix(&self, digits: &str) -> StoreResult<Vec<LearnerId>> {
        Ok(LearnerRow::find_ids_by_phone_suffix(self.pool(), digits)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(LearnerId::from_uuid)
            .collect())
    }

    async fn find_by_dob_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: u32,
    ) -> StoreResult<Vec<LearnerCandidate>> {
        Ok(
            LearnerRow::find_by_dob_range(self.pool(), from, to, i64::from(limit))
                .await
                .map_err(store_error)?
                .into_iter()
                .map(|row| LearnerCandidate {
                    id: LearnerId::from_uuid(row.id),
                    name: row.name,
                    dob: row.dob,
                })
                .collect(),
        )
    }
}
