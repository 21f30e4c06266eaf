use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{
    CanonicalCredential, CredentialFilter, CredentialRecordId, CredentialStatus, CredentialStore,
    ExternalCredentialRecord, IdempotencyKey, InsertOutcome, IssuerId, LearnerId,
    NewExternalCredential, Page, StatusCounts, StoreError, StoreResult,
};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use super::idempotency::ProcessedCredentialRow;
use super::{from_i64, to_i64, PgStore};
use crate::error::{corrupt, store_error};

/// A row of `external_credentials`.
#[derive(Debug, Clone, FromRow)]
pub struct ExternalCredentialRow {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub provider: String,
    pub provider_credential_id: String,
    pub canonical: serde_json::Value,
    pub encrypted_raw: Vec<u8>,
    pub signature_verified: bool,
    pub verification_method: String,
    pub match_confidence: f64,
    pub match_type: String,
    pub learner_id: Option<Uuid>,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl ExternalCredentialRow {
    /// Insert unless the natural key exists. `None` means it did.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        new: &NewExternalCredential,
        canonical: serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO external_credentials (
                id, issuer_id, provider, provider_credential_id, canonical, encrypted_raw,
                signature_verified, verification_method, match_confidence, match_type,
                learner_id, status, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT ON CONSTRAINT external_credentials_natural_key DO NOTHING
            RETURNING *
            ",
        )
        .bind(id)
        .bind(new.issuer_id.into_uuid())
        .bind(&new.provider)
        .bind(&new.provider_credential_id)
        .bind(canonical)
        .bind(&new.encrypted_raw)
        .bind(new.signature_verified)
        .bind(new.verification_method.as_str())
        .bind(new.match_confidence)
        .bind(new.match_type.as_str())
        .bind(new.learner_id.map(LearnerId::into_uuid))
        .bind(new.status.as_str())
        .bind(new.received_at)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_natural_key<'e, E: PgExecutor<'e>>(
        executor: E,
        provider: &str,
        issuer_id: Uuid,
        provider_credential_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM external_credentials
            WHERE provider = $1 AND issuer_id = $2 AND provider_credential_id = $3
            ",
        )
        .bind(provider)
        .bind(issuer_id)
        .bind(provider_credential_id)
        .fetch_optional(executor)
        .await
    }

    fn filter_clause(filter: &CredentialFilter) -> (String, usize) {
        let mut clause = String::from(" WHERE 1 = 1");
        let mut param_count = 0;

        if filter.status.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.issuer_id.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND issuer_id = ${param_count}"));
        }
        (clause, param_count)
    }

    pub async fn list(pool: &PgPool, filter: &CredentialFilter) -> Result<Vec<Self>, sqlx::Error> {
        let (clause, param_count) = Self::filter_clause(filter);
        let query = format!(
            "SELECT * FROM external_credentials{clause} ORDER BY processed_at DESC, id LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );

        let mut q = sqlx::query_as::<_, Self>(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(issuer_id) = filter.issuer_id {
            q = q.bind(issuer_id.into_uuid());
        }

        q.bind(i64::from(filter.limit))
            .bind(to_i64(filter.offset))
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &PgPool, filter: &CredentialFilter) -> Result<i64, sqlx::Error> {
        let (clause, _) = Self::filter_clause(filter);
        let query = format!("SELECT COUNT(*) FROM external_credentials{clause}");

        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(issuer_id) = filter.issuer_id {
            q = q.bind(issuer_id.into_uuid());
        }

        q.fetch_one(pool).await
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT status, COUNT(*) FROM external_credentials
            GROUP BY status
            ",
        )
        .fetch_all(pool)
        .await
    }

    pub fn into_record(self) -> StoreResult<ExternalCredentialRecord> {
        let canonical: CanonicalCredential = serde_json::from_value(self.canonical)
            .map_err(|e| corrupt("external_credentials.canonical", e))?;
        Ok(ExternalCredentialRecord {
            id: CredentialRecordId::from_uuid(self.id),
            issuer_id: IssuerId::from_uuid(self.issuer_id),
            provider: self.provider,
            provider_credential_id: self.provider_credential_id,
            canonical,
            encrypted_raw: self.encrypted_raw,
            signature_verified: self.signature_verified,
            verification_method: self
                .verification_method
                .parse()
                .map_err(|e| corrupt("external_credentials.verification_method", e))?,
            match_confidence: self.match_confidence,
            match_type: self
                .match_type
                .parse()
                .map_err(|e| corrupt("external_credentials.match_type", e))?,
            learner_id: self.learner_id.map(LearnerId::from_uuid),
            status: self
                .status
                .parse()
                .map_err(|e| corrupt("external_credentials.status", e))?,
            received_at: self.received_at,
            processed_at: self.processed_at,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_credential(&self, new: NewExternalCredential) -> StoreResult<InsertOutcome> {
        let canonical = serde_json::to_value(&new.canonical)
            .map_err(|e| corrupt("canonical credential", e))?;

        if let Some(row) = ExternalCredentialRow::insert(self.pool(), Uuid::new_v4(), &new, canonical)
            .await
            .map_err(store_error)?
        {
            return Ok(InsertOutcome::Inserted(row.into_record()?));
        }

        let existing = ExternalCredentialRow::find_by_natural_key(
            self.pool(),
            &new.provider,
            new.issuer_id.into_uuid(),
            &new.provider_credential_id,
        )
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            StoreError::Constraint(format!(
                "credential {} conflicted but could not be read back",
                new.provider_credential_id
            ))
        })?;
        Ok(InsertOutcome::Duplicate(existing.into_record()?))
    }

    async fn insert_and_mark(
        &self,
        new: NewExternalCredential,
        key: &IdempotencyKey,
    ) -> StoreResult<InsertOutcome> {
        let canonical = serde_json::to_value(&new.canonical)
            .map_err(|e| corrupt("canonical credential", e))?;
        let mut tx = self.pool().begin().await.map_err(store_error)?;

        let outcome = match ExternalCredentialRow::insert(&mut *tx, Uuid::new_v4(), &new, canonical)
            .await
            .map_err(store_error)?
        {
            Some(row) => InsertOutcome::Inserted(row.into_record()?),
            None => {
                let existing = ExternalCredentialRow::find_by_natural_key(
                    &mut *tx,
                    &new.provider,
                    new.issuer_id.into_uuid(),
                    &new.provider_credential_id,
                )
                .await
                .map_err(store_error)?
                .ok_or_else(|| {
                    StoreError::Constraint(format!(
                        "credential {} conflicted but could not be read back",
                        new.provider_credential_id
                    ))
                })?;
                InsertOutcome::Duplicate(existing.into_record()?)
            }
        };

        ProcessedCredentialRow::insert(&mut *tx, key.as_str(), outcome.record().id.into_uuid())
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(outcome)
    }

    async fn find_by_provider_id(
        &self,
        provider: &str,
        issuer_id: IssuerId,
        provider_credential_id: &str,
    ) -> StoreResult<Option<ExternalCredentialRecord>> {
        ExternalCredentialRow::find_by_natural_key(
            self.pool(),
            provider,
            issuer_id.into_uuid(),
            provider_credential_id,
        )
        .await
        .map_err(store_error)?
        .map(ExternalCredentialRow::into_record)
        .transpose()
    }

    async fn list_credentials(
        &self,
        filter: &CredentialFilter,
    ) -> StoreResult<Page<ExternalCredentialRecord>> {
        let rows = ExternalCredentialRow::list(self.pool(), filter)
            .await
            .map_err(store_error)?;
        let total = ExternalCredentialRow::count(self.pool(), filter)
            .await
            .map_err(store_error)?;
        let items = rows
            .into_iter()
            .map(ExternalCredentialRow::into_record)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: from_i64(total),
        })
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let rows = ExternalCredentialRow::count_by_status(self.pool())
            .await
            .map_err(store_error)?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let n = from_i64(n);
            counts.total += n;
            match status.parse::<CredentialStatus>() {
                Ok(CredentialStatus::Verified) => counts.verified += n,
                Ok(CredentialStatus::Pending) => counts.pending += n,
                Ok(CredentialStatus::Rejected) => counts.rejected += n,
                Err(e) => return Err(corrupt("external_credentials.status", e)),
            }
        }
        Ok(counts)
    }
}
