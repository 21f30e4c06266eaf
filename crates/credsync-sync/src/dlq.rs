//! Dead letter queue service.
//!
//! Entries are only ever added by the worker. Operators list them, retry
//! them (the stored payload goes back on the queue under its original key)
//! or delete them. Nothing retries entries automatically.

use std::sync::Arc;

use credsync_core::{DeadLetterStore, DlqEntry, DlqEntryId, EnqueueOutcome, JobId, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::enqueue::CredentialEnqueuer;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("DLQ entry not found: {0}")]
    NotFound(DlqEntryId),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Paginated list of DLQ entries.
#[derive(Debug, Clone, Serialize)]
pub struct DlqEntryList {
    pub entries: Vec<DlqEntry>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryResponse {
    pub id: DlqEntryId,
    /// `None` when an active job already held the key.
    pub job_id: Option<JobId>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkRetryResponse {
    pub retried: Vec<RetryResponse>,
    pub not_found: Vec<DlqEntryId>,
    pub failed: Vec<DlqEntryId>,
}

#[derive(Clone)]
pub struct DlqService {
    store: Arc<dyn DeadLetterStore>,
    enqueuer: CredentialEnqueuer,
}

impl DlqService {
    pub fn new(store: Arc<dyn DeadLetterStore>, enqueuer: CredentialEnqueuer) -> Self {
        Self { store, enqueuer }
    }

    /// Newest first. `limit` is clamped to `1..=100`.
    pub async fn list(&self, limit: u32, offset: u64) -> Result<DlqEntryList, DlqError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let page = self.store.list_entries(limit, offset).await?;
        let has_more = page.has_more(offset);
        Ok(DlqEntryList {
            entries: page.items,
            total: page.total,
            has_more,
        })
    }

    pub async fn get(&self, id: DlqEntryId) -> Result<DlqEntry, DlqError> {
        self.store
            .get_entry(id)
            .await?
            .ok_or(DlqError::NotFound(id))
    }

    pub async fn count(&self) -> Result<u64, DlqError> {
        Ok(self.store.count_entries().await?)
    }

    /// Put the entry's payload back on the queue and remove the entry.
    pub async fn retry(&self, id: DlqEntryId) -> Result<RetryResponse, DlqError> {
        let entry = self.get(id).await?;

        let outcome = self.enqueuer.enqueue_payload(entry.payload.clone()).await?;
        let (job_id, message) = match outcome {
            EnqueueOutcome::Enqueued(job_id) => (Some(job_id), "Queued for processing"),
            EnqueueOutcome::Duplicate => (None, "Already queued for processing"),
        };
        self.store.remove_entry(id).await?;

        tracing::info!(
            target: "dlq",
            dlq_id = %id,
            idempotency_key = %entry.job_id,
            job_id = ?job_id,
            "DLQ entry retried"
        );

        Ok(RetryResponse {
            id,
            job_id,
            message: message.to_string(),
        })
    }

    /// Retry each entry independently. One failure does not stop the rest.
    pub async fn retry_bulk(&self, ids: &[DlqEntryId]) -> BulkRetryResponse {
        let mut response = BulkRetryResponse::default();
        for &id in ids {
            match self.retry(id).await {
                Ok(retried) => response.retried.push(retried),
                Err(DlqError::NotFound(_)) => response.not_found.push(id),
                Err(e) => {
                    tracing::warn!(target: "dlq", dlq_id = %id, error = %e, "DLQ retry failed");
                    response.failed.push(id);
                }
            }
        }

        tracing::info!(
            target: "dlq",
            requested = ids.len(),
            retried = response.retried.len(),
            not_found = response.not_found.len(),
            failed = response.failed.len(),
            "Bulk DLQ retry complete"
        );
        response
    }

    pub async fn delete(&self, id: DlqEntryId) -> Result<(), DlqError> {
        if !self.store.remove_entry(id).await? {
            return Err(DlqError::NotFound(id));
        }
        tracing::info!(target: "dlq", dlq_id = %id, "DLQ entry deleted");
        Ok(())
    }
}

impl std::fmt::Debug for DlqService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqService").finish_non_exhaustive()
    }
}
