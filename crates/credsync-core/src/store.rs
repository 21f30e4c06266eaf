//! Contracts between the pipeline and its storage collaborators.
//!
//! `credsync-db` provides a Postgres implementation of every trait here and
//! an in-memory one for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::credential::{CredentialStatus, ExternalCredentialRecord, NewExternalCredential};
use crate::directory::{IssuerProfile, LearnerCandidate, SyncState};
use crate::error::StoreResult;
use crate::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::ids::{CredentialRecordId, DlqEntryId, IssuerId, JobId, LearnerId};
use crate::job::{CredentialJob, DlqEntry, EnqueueOutcome, NewCredentialJob, NewDlqEntry, QueueDepth};

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn has_more(&self, offset: u64) -> bool {
        offset + (self.items.len() as u64) < self.total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFilter {
    pub status: Option<CredentialStatus>,
    pub issuer_id: Option<IssuerId>,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub verified: u64,
    pub pending: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(ExternalCredentialRecord),
    /// The (provider, issuer, credential) triple is already stored.
    Duplicate(ExternalCredentialRecord),
}

impl InsertOutcome {
    #[must_use]
    pub fn record(&self) -> &ExternalCredentialRecord {
        match self {
            Self::Inserted(r) | Self::Duplicate(r) => r,
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a record, or hand back the existing one for the same triple.
    async fn insert_credential(&self, new: NewExternalCredential) -> StoreResult<InsertOutcome>;

    /// Insert a record and mark `key` processed for it as one unit.
    ///
    /// On a duplicate triple the existing record is marked instead. No mark
    /// is written if the insert fails.
    async fn insert_and_mark(
        &self,
        new: NewExternalCredential,
        key: &IdempotencyKey,
    ) -> StoreResult<InsertOutcome>;

    async fn find_by_provider_id(
        &self,
        provider: &str,
        issuer_id: IssuerId,
        provider_credential_id: &str,
    ) -> StoreResult<Option<ExternalCredentialRecord>>;

    async fn list_credentials(
        &self,
        filter: &CredentialFilter,
    ) -> StoreResult<Page<ExternalCredentialRecord>>;

    async fn count_by_status(&self) -> StoreResult<StatusCounts>;
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(&self, key: &IdempotencyKey) -> StoreResult<bool>;

    async fn get_processed(&self, key: &IdempotencyKey) -> StoreResult<Option<IdempotencyRecord>>;

    /// Mark `key` processed for `credential_id`.
    ///
    /// Returns `false` when the key was already marked. Fails with
    /// [`StoreError::Constraint`](crate::StoreError::Constraint) if the
    /// credential record does not exist.
    async fn mark_processed(
        &self,
        key: &IdempotencyKey,
        credential_id: CredentialRecordId,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait LearnerDirectory: Send + Sync {
    /// Learner whose primary email equals `email`, ignoring case.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LearnerId>>;

    /// Learners listing `email` among their alternate addresses.
    async fn find_by_alternate_email(&self, email: &str) -> StoreResult<Vec<LearnerId>>;

    /// Learners whose normalized phone ends with these 10 digits.
    async fn find_by_phone_suffix(&self, digits: &str) -> StoreResult<Vec<LearnerId>>;

    /// Learners born within `[from, to]`, at most `limit`.
    async fn find_by_dob_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: u32,
    ) -> StoreResult<Vec<LearnerCandidate>>;
}

#[async_trait]
pub trait IssuerDirectory: Send + Sync {
    async fn get_issuer(&self, id: IssuerId) -> StoreResult<Option<IssuerProfile>>;

    async fn find_by_registry_id(
        &self,
        provider: &str,
        registry_id: &str,
    ) -> StoreResult<Option<IssuerProfile>>;

    /// Issuers that opted in to external credentials.
    async fn list_external_issuers(&self) -> StoreResult<Vec<IssuerProfile>>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_sync_state(&self, issuer_id: IssuerId) -> StoreResult<Option<SyncState>>;

    async fn list_sync_states(&self) -> StoreResult<Vec<SyncState>>;

    /// Advance `last_successful_sync_at` to `at`. Never moves it backwards.
    async fn record_sync(&self, issuer_id: IssuerId, provider: &str, at: DateTime<Utc>)
        -> StoreResult<()>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue unless an active job already holds the key.
    async fn enqueue(&self, job: NewCredentialJob) -> StoreResult<EnqueueOutcome>;

    /// Claim up to `limit` due jobs, moving them to `processing` and
    /// incrementing their attempt counter.
    async fn claim_due(&self, limit: u32, now: DateTime<Utc>) -> StoreResult<Vec<CredentialJob>>;

    async fn complete(&self, id: JobId) -> StoreResult<()>;

    /// Put a job back to `pending`, runnable at `run_at`.
    async fn schedule_retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> StoreResult<()>;

    /// Terminal failure. Releases the key.
    async fn mark_dead(&self, id: JobId, error: &str) -> StoreResult<()>;

    /// Return jobs stuck in `processing` since before `older_than` to `pending`.
    async fn release_stale(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;

    async fn depth(&self) -> StoreResult<QueueDepth>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn add_entry(&self, entry: NewDlqEntry) -> StoreResult<DlqEntry>;

    async fn list_entries(&self, limit: u32, offset: u64) -> StoreResult<Page<DlqEntry>>;

    async fn get_entry(&self, id: DlqEntryId) -> StoreResult<Option<DlqEntry>>;

    /// Returns `false` if there was no such entry.
    async fn remove_entry(&self, id: DlqEntryId) -> StoreResult<bool>;

    async fn count_entries(&self) -> StoreResult<u64>;
}

/// A JWKS document as last fetched from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct JwksSnapshot {
    pub jwks_url: String,
    pub jwks: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// Durable fallback for provider key sets.
#[async_trait]
pub trait JwksSnapshotStore: Send + Sync {
    async fn load_snapshot(&self, jwks_url: &str) -> StoreResult<Option<JwksSnapshot>>;

    async fn save_snapshot(&self, snapshot: &JwksSnapshot) -> StoreResult<()>;
}
