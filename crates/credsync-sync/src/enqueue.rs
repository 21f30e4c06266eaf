//! Submitting raw credentials to the durable queue.

use std::sync::Arc;

use credsync_core::{
    EnqueueOutcome, IssuerId, JobPayload, JobQueue, NewCredentialJob, RawProviderCredential,
    StoreResult,
};
use tracing::{debug, info};

/// Producer side of the credential queue, shared by webhook intake, the
/// poller and DLQ retries.
#[derive(Clone)]
pub struct CredentialEnqueuer {
    queue: Arc<dyn JobQueue>,
    max_attempts: u32,
}

impl CredentialEnqueuer {
    pub fn new(queue: Arc<dyn JobQueue>, max_attempts: u32) -> Self {
        Self {
            queue,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn enqueue(
        &self,
        provider: &str,
        issuer_id: IssuerId,
        raw_credential: RawProviderCredential,
    ) -> StoreResult<EnqueueOutcome> {
        self.enqueue_payload(JobPayload {
            provider: provider.to_string(),
            issuer_id,
            raw_credential,
        })
        .await
    }

    pub async fn enqueue_payload(&self, payload: JobPayload) -> StoreResult<EnqueueOutcome> {
        let job = NewCredentialJob::new(payload, self.max_attempts);
        let key = job.idempotency_key.clone();
        let outcome = self.queue.enqueue(job).await?;
        match outcome {
            EnqueueOutcome::Enqueued(job_id) => {
                info!(idempotency_key = %key, job_id = %job_id, "Enqueued credential for processing");
            }
            EnqueueOutcome::Duplicate => {
                debug!(idempotency_key = %key, "Credential already queued");
            }
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for CredentialEnqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEnqueuer")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
