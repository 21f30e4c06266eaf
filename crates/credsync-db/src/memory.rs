//! In-process implementation of every store contract.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use credsync_core::{
    phone_suffix, CredentialFilter, CredentialJob, CredentialRecordId, CredentialStatus,
    CredentialStore, DeadLetterStore, DlqEntry, DlqEntryId, EnqueueOutcome, ExternalCredentialRecord,
    IdempotencyKey, IdempotencyRecord, IdempotencyStore, InsertOutcome, IssuerDirectory, IssuerId,
    IssuerProfile, JobId, JobQueue, JobStatus, JwksSnapshot, JwksSnapshotStore, LearnerCandidate,
    LearnerDirectory, LearnerId, NewCredentialJob, NewDlqEntry, NewExternalCredential, Page,
    QueueDepth, StatusCounts, StoreError, StoreResult, SyncState, SyncStateStore,
};
use std::collections::HashMap;
use std::io;
use tokio::sync::Mutex;

/// A learner as seeded into [`InMemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerRecord {
    pub id: LearnerId,
    pub name: String,
    pub email: Option<String>,
    pub alternate_emails: Vec<String>,
    pub phone: Option<String>,
    pub dob: Option<NaiveDate>,
}

impl LearnerRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LearnerId::new(),
            name: name.into(),
            email: None,
            alternate_emails: Vec::new(),
            phone: None,
            dob: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_alternate_email(mut self, email: impl Into<String>) -> Self {
        self.alternate_emails.push(email.into());
        self
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn with_dob(mut self, dob: NaiveDate) -> Self {
        self.dob = Some(dob);
        self
    }
}

#[derive(Debug, Default)]
struct State {
    issuers: Vec<IssuerProfile>,
    learners: Vec<LearnerRecord>,
    credentials: Vec<ExternalCredentialRecord>,
    processed: HashMap<IdempotencyKey, IdempotencyRecord>,
    sync_states: HashMap<IssuerId, SyncState>,
    jobs: Vec<CredentialJob>,
    dlq: Vec<DlqEntry>,
    snapshots: HashMap<String, JwksSnapshot>,
    /// Credential writes left to fail with an unavailable error.
    failing_credential_writes: u32,
}

/// HashMap-backed store. Data lives as long as the value.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_issuer(&self, issuer: IssuerProfile) {
        self.state.lock().await.issuers.push(issuer);
    }

    pub async fn add_learner(&self, learner: LearnerRecord) {
        self.state.lock().await.learners.push(learner);
    }

    /// Make the next `count` credential inserts fail as if the database
    /// were down.
    pub async fn fail_credential_writes(&self, count: u32) {
        self.state.lock().await.failing_credential_writes = count;
    }

    /// All jobs ever enqueued, in any status.
    pub async fn jobs(&self) -> Vec<CredentialJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn credential_count(&self) -> usize {
        self.state.lock().await.credentials.len()
    }
}

impl State {
    fn insert(&mut self, new: NewExternalCredential) -> StoreResult<InsertOutcome> {
        if self.failing_credential_writes > 0 {
            self.failing_credential_writes -= 1;
            return Err(StoreError::unavailable(
                "credential write failed",
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            ));
        }

        if let Some(existing) = self.credentials.iter().find(|c| {
            c.provider == new.provider
                && c.issuer_id == new.issuer_id
                && c.provider_credential_id == new.provider_credential_id
        }) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }

        let record = ExternalCredentialRecord::from_new(new, Utc::now());
        self.credentials.push(record.clone());
        Ok(InsertOutcome::Inserted(record))
    }
}

fn page<T: Clone>(items: &[T], limit: u32, offset: u64) -> Page<T> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(items.len());
    let end = start.saturating_add(limit as usize).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        total: items.len() as u64,
    }
}

fn find_job(jobs: &mut [CredentialJob], id: JobId) -> StoreResult<&mut CredentialJob> {
    jobs.iter_mut()
        .find(|j| j.id == id)
        .ok_or_else(|| StoreError::not_found("job", id))
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn insert_credential(&self, new: NewExternalCredential) -> StoreResult<InsertOutcome> {
        self.state.lock().await.insert(new)
    }

    async fn insert_and_mark(
        &self,
        new: NewExternalCredential,
        key: &IdempotencyKey,
    ) -> StoreResult<InsertOutcome> {
        let mut state = self.state.lock().await;
        let outcome = state.insert(new)?;
        let credential_id = outcome.record().id;
        state
            .processed
            .entry(key.clone())
            .or_insert_with(|| IdempotencyRecord {
                key: key.clone(),
                credential_id,
                processed_at: Utc::now(),
            });
        Ok(outcome)
    }

    async fn find_by_provider_id(
        &self,
        provider: &str,
        issuer_id: IssuerId,
        provider_credential_id: &str,
    ) -> StoreResult<Option<ExternalCredentialRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .credentials
            .iter()
            .find(|c| {
                c.provider == provider
                    && c.issuer_id == issuer_id
                    && c.provider_credential_id == provider_credential_id
            })
            .cloned())
    }

    async fn list_credentials(
        &self,
        filter: &CredentialFilter,
    ) -> StoreResult<Page<ExternalCredentialRecord>> {
        let state = self.state.lock().await;
        let mut matching: Vec<ExternalCredentialRecord> = state
            .credentials
            .iter()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.issuer_id.map_or(true, |i| c.issuer_id == i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(page(&matching, filter.limit, filter.offset))
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for c in &state.credentials {
            counts.total += 1;
            match c.status {
                CredentialStatus::Verified => counts.verified += 1,
                CredentialStatus::Pending => counts.pending += 1,
                CredentialStatus::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn is_processed(&self, key: &IdempotencyKey) -> StoreResult<bool> {
        Ok(self.state.lock().await.processed.contains_key(key))
    }

    async fn get_processed(&self, key: &IdempotencyKey) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self.state.lock().await.processed.get(key).cloned())
    }

    async fn mark_processed(
        &self,
        key: &IdempotencyKey,
        credential_id: CredentialRecordId,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if !state.credentials.iter().any(|c| c.id == credential_id) {
            return Err(StoreError::Constraint(format!(
                "credential {credential_id} does not exist"
            )));
        }
        if state.processed.contains_key(key) {
            return Ok(false);
        }
        state.processed.insert(
            key.clone(),
            IdempotencyRecord {
                key: key.clone(),
                credential_id,
                processed_at: Utc::now(),
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl LearnerDirectory for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LearnerId>> {
        let state = self.state.lock().await;
        Ok(state
            .learners
            .iter()
            .find(|l| l.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .map(|l| l.id))
    }

    async fn find_by_alternate_email(&self, email: &str) -> StoreResult<Vec<LearnerId>> {
        let state = self.state.lock().await;
        Ok(state
            .learners
            .iter()
            .filter(|l| l.alternate_emails.iter().any(|e| e.eq_ignore_ascii_case(email)))
            .map(|l| l.id)
            .collect())
    }

    async fn find_by_phone_suffix(&self, digits: &str) -> StoreResult<Vec<LearnerId>> {
        let state = self.state.lock().await;
        Ok(state
            .learners
            .iter()
            .filter(|l| {
                l.phone
                    .as_deref()
                    .and_then(phone_suffix)
                    .is_some_and(|s| s == digits)
            })
            .map(|l| l.id)
            .collect())
    }

    async fn find_by_dob_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: u32,
    ) -> StoreResult<Vec<LearnerCandidate>> {
        let state = self.state.lock().await;
        Ok(state
            .learners
            .iter()
            .filter(|l| l.dob.is_some_and(|d| d >= from && d <= to))
            .take(limit as usize)
            .map(|l| LearnerCandidate {
                id: l.id,
                name: l.name.clone(),
                dob: l.dob,
            })
            .collect())
    }
}

#[async_trait]
impl IssuerDirectory for InMemoryStore {
    async fn get_issuer(&self, id: IssuerId) -> StoreResult<Option<IssuerProfile>> {
        let state = self.state.lock().await;
        Ok(state.issuers.iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_registry_id(
        &self,
        provider: &str,
        registry_id: &str,
    ) -> StoreResult<Option<IssuerProfile>> {
        let state = self.state.lock().await;
        Ok(state
            .issuers
            .iter()
            .find(|i| {
                i.provider.eq_ignore_ascii_case(provider)
                    && i.registry_id.as_deref() == Some(registry_id)
            })
            .cloned())
    }

    async fn list_external_issuers(&self) -> StoreResult<Vec<IssuerProfile>> {
        let state = self.state.lock().await;
        Ok(state
            .issuers
            .iter()
            .filter(|i| i.accept_external)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SyncStateStore for InMemoryStore {
    async fn get_sync_state(&self, issuer_id: IssuerId) -> StoreResult<Option<SyncState>> {
        Ok(self.state.lock().await.sync_states.get(&issuer_id).cloned())
    }

    async fn list_sync_states(&self) -> StoreResult<Vec<SyncState>> {
        let state = self.state.lock().await;
        let mut states: Vec<SyncState> = state.sync_states.values().cloned().collect();
        states.sort_by_key(|s| s.last_successful_sync_at);
        Ok(states)
    }

    async fn record_sync(
        &self,
        issuer_id: IssuerId,
        provider: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.sync_states.entry(issuer_id).or_insert_with(|| SyncState {
            issuer_id,
            provider: provider.to_string(),
            last_successful_sync_at: None,
        });
        entry.provider = provider.to_string();
        entry.last_successful_sync_at = entry.last_successful_sync_at.max(Some(at));
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryStore {
    async fn enqueue(&self, job: NewCredentialJob) -> StoreResult<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state
            .jobs
            .iter()
            .any(|j| j.status.is_active() && j.idempotency_key == job.idempotency_key)
        {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let now = Utc::now();
        let id = JobId::new();
        state.jobs.push(CredentialJob {
            id,
            idempotency_key: job.idempotency_key,
            payload: job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            last_error: None,
            run_at: now,
            created_at: now,
            updated_at: now,
        });
        Ok(EnqueueOutcome::Enqueued(id))
    }

    async fn claim_due(&self, limit: u32, now: DateTime<Utc>) -> StoreResult<Vec<CredentialJob>> {
        let mut state = self.state.lock().await;
        let mut due: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Pending && j.run_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (state.jobs[i].run_at, state.jobs[i].created_at));
        due.truncate(limit as usize);

        let claimed_at = Utc::now();
        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let job = &mut state.jobs[i];
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.updated_at = claimed_at;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, id: JobId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn schedule_retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Pending;
        job.run_at = run_at;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_dead(&self, id: JobId, error: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Dead;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn release_stale(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut released = 0;
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < older_than)
        {
            job.status = JobStatus::Pending;
            job.run_at = now;
            job.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn depth(&self) -> StoreResult<QueueDepth> {
        let state = self.state.lock().await;
        let mut depth = QueueDepth::default();
        for job in &state.jobs {
            match job.status {
                JobStatus::Pending => depth.pending += 1,
                JobStatus::Processing => depth.processing += 1,
                JobStatus::Dead => depth.dead += 1,
                JobStatus::Completed => {}
            }
        }
        Ok(depth)
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryStore {
    async fn add_entry(&self, entry: NewDlqEntry) -> StoreResult<DlqEntry> {
        let mut state = self.state.lock().await;
        let entry = DlqEntry {
            id: DlqEntryId::new(),
            job_type: entry.job_type,
            job_id: entry.job_id,
            reason: entry.reason,
            payload: entry.payload,
            attempts: entry.attempts,
            created_at: Utc::now(),
        };
        // Newest first, like the Postgres listing.
        state.dlq.insert(0, entry.clone());
        Ok(entry)
    }

    async fn list_entries(&self, limit: u32, offset: u64) -> StoreResult<Page<DlqEntry>> {
        let state = self.state.lock().await;
        Ok(page(&state.dlq, limit, offset))
    }

    async fn get_entry(&self, id: DlqEntryId) -> StoreResult<Option<DlqEntry>> {
        let state = self.state.lock().await;
        Ok(state.dlq.iter().find(|e| e.id == id).cloned())
    }

    async fn remove_entry(&self, id: DlqEntryId) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.dlq.len();
        state.dlq.retain(|e| e.id != id);
        Ok(state.dlq.len() < before)
    }

    async fn count_entries(&self) -> StoreResult<u64> {
        Ok(self.state.lock().await.dlq.len() as u64)
    }
}

#[async_trait]
impl JwksSnapshotStore for InMemoryStore {
    async fn load_snapshot(&self, jwks_url: &str) -> StoreResult<Option<JwksSnapshot>> {
        Ok(self.state.lock().await.snapshots.get(jwks_url).cloned())
    }

    async fn save_snapshot(&self, snapshot: &JwksSnapshot) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .snapshots
            .insert(snapshot.jwks_url.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use credsync_core::{
        CanonicalCredential, JobPayload, MatchType, RawProviderCredential, SignatureType,
        VerificationMethod,
    };
    use serde_json::json;

    fn new_credential(issuer_id: IssuerId, id: &str) -> NewExternalCredential {
        NewExternalCredential {
            issuer_id,
            provider: "nsdc".into(),
            provider_credential_id: id.into(),
            canonical: CanonicalCredential {
                provider_credential_id: id.into(),
                recipient_email: Some("a@x.com".into()),
                recipient_phone: None,
                recipient_name: Some("Asha".into()),
                recipient_dob: None,
                certificate_title: "Welder".into(),
                issue_date: Utc::now(),
                expiry_date: None,
                skills: vec![],
                metadata: json!({}),
            },
            encrypted_raw: vec![1, 2, 3],
            signature_verified: true,
            verification_method: VerificationMethod::Jws,
            match_confidence: 1.0,
            match_type: MatchType::Email,
            learner_id: None,
            status: CredentialStatus::Verified,
            received_at: Utc::now(),
        }
    }

    fn job(issuer_id: IssuerId, id: &str) -> NewCredentialJob {
        NewCredentialJob::new(
            JobPayload {
                provider: "nsdc".into(),
                issuer_id,
                raw_credential: RawProviderCredential {
                    id: id.into(),
                    signed_payload: json!({}),
                    signature_type: SignatureType::None,
                    signature_header: None,
                    raw_data: json!({}),
                },
            },
            3,
        )
    }

    #[tokio::test]
    async fn test_insert_same_triple_returns_existing() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();

        let first = store.insert_credential(new_credential(issuer, "C1")).await.unwrap();
        let second = store.insert_credential(new_credential(issuer, "C1")).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(matches!(second, InsertOutcome::Duplicate(_)));
        assert_eq!(first.record().id, second.record().id);
        assert_eq!(store.credential_count().await, 1);
    }

    #[tokio::test]
    async fn test_mark_requires_existing_credential() {
        let store = InMemoryStore::new();
        let key = IdempotencyKey::new("nsdc", IssuerId::new(), "C1");

        let err = store
            .mark_processed(&key, CredentialRecordId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(!store.is_processed(&key).await.unwrap());

        let issuer = IssuerId::new();
        let record = store.insert_credential(new_credential(issuer, "C1")).await.unwrap();
        assert!(store.mark_processed(&key, record.record().id).await.unwrap());
        assert!(!store.mark_processed(&key, record.record().id).await.unwrap());
        assert!(store.is_processed(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_and_mark_marks_once() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();
        let key = IdempotencyKey::new("nsdc", issuer, "C1");

        let first = store
            .insert_and_mark(new_credential(issuer, "C1"), &key)
            .await
            .unwrap();
        let second = store
            .insert_and_mark(new_credential(issuer, "C1"), &key)
            .await
            .unwrap();

        assert!(matches!(second, InsertOutcome::Duplicate(_)));
        let mark = store.get_processed(&key).await.unwrap().unwrap();
        assert_eq!(mark.credential_id, first.record().id);
        assert_eq!(store.credential_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_key_unmarked() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();
        let key = IdempotencyKey::new("nsdc", issuer, "C1");
        store.fail_credential_writes(1).await;

        assert!(store
            .insert_and_mark(new_credential(issuer, "C1"), &key)
            .await
            .is_err());
        assert!(!store.is_processed(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_write_failures_are_transient() {
        let store = InMemoryStore::new();
        store.fail_credential_writes(1).await;

        let err = store
            .insert_credential(new_credential(IssuerId::new(), "C1"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store
            .insert_credential(new_credential(IssuerId::new(), "C1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_queue_dedups_only_active_jobs() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();

        assert!(store.enqueue(job(issuer, "C1")).await.unwrap().is_enqueued());
        assert_eq!(store.enqueue(job(issuer, "C1")).await.unwrap(), EnqueueOutcome::Duplicate);

        let claimed = store.claim_due(10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(store.enqueue(job(issuer, "C1")).await.unwrap(), EnqueueOutcome::Duplicate);

        store.complete(claimed[0].id).await.unwrap();
        assert!(store.enqueue(job(issuer, "C1")).await.unwrap().is_enqueued());
    }

    #[tokio::test]
    async fn test_retry_is_not_claimable_before_run_at() {
        let store = InMemoryStore::new();
        store.enqueue(job(IssuerId::new(), "C1")).await.unwrap();
        let claimed = store.claim_due(10, Utc::now()).await.unwrap();

        let later = Utc::now() + Duration::seconds(30);
        store.schedule_retry(claimed[0].id, later, "boom").await.unwrap();

        assert!(store.claim_due(10, Utc::now()).await.unwrap().is_empty());
        let again = store.claim_due(10, later).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 2);
        assert_eq!(again[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_release_stale_processing() {
        let store = InMemoryStore::new();
        store.enqueue(job(IssuerId::new(), "C1")).await.unwrap();
        store.claim_due(10, Utc::now()).await.unwrap();

        assert_eq!(store.release_stale(Utc::now() - Duration::minutes(5)).await.unwrap(), 0);
        assert_eq!(store.release_stale(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
        assert_eq!(store.depth().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_sync_state_never_moves_backwards() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();
        let now = Utc::now();

        store.record_sync(issuer, "nsdc", now).await.unwrap();
        store.record_sync(issuer, "nsdc", now - Duration::hours(2)).await.unwrap();

        let state = store.get_sync_state(issuer).await.unwrap().unwrap();
        assert_eq!(state.last_successful_sync_at, Some(now));
    }

    #[tokio::test]
    async fn test_learner_lookups() {
        let store = InMemoryStore::new();
        let asha = LearnerRecord::new("Asha Rao")
            .with_email("Asha@Example.com")
            .with_alternate_email("asha.alt@example.com")
            .with_phone("+91 98765 43210")
            .with_dob(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap());
        let asha_id = asha.id;
        store.add_learner(asha).await;

        assert_eq!(store.find_by_email("asha@example.com").await.unwrap(), Some(asha_id));
        assert_eq!(
            store.find_by_alternate_email("ASHA.ALT@example.com").await.unwrap(),
            vec![asha_id]
        );
        assert_eq!(store.find_by_phone_suffix("9876543210").await.unwrap(), vec![asha_id]);

        let from = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
        assert_eq!(store.find_by_dob_range(from, to, 100).await.unwrap().len(), 1);
        assert!(store.find_by_dob_range(to, to, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dlq_listing_is_newest_first() {
        let store = InMemoryStore::new();
        let issuer = IssuerId::new();
        for id in ["C1", "C2", "C3"] {
            let payload = job(issuer, id).payload;
            store
                .add_entry(NewDlqEntry {
                    job_type: credsync_core::CREDENTIAL_PROCESSING_JOB.into(),
                    job_id: payload.idempotency_key(),
                    reason: "bad signature".into(),
                    payload,
                    attempts: 1,
                })
                .await
                .unwrap();
        }

        let first = store.list_entries(2, 0).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.items[0].payload.raw_credential.id, "C3");
        assert!(first.has_more(0));

        let id = first.items[0].id;
        assert!(store.remove_entry(id).await.unwrap());
        assert!(!store.remove_entry(id).await.unwrap());
        assert_eq!(store.count_entries().await.unwrap(), 2);
    }
}
