//! Credential Worker
//!
//! Background worker that drains the credential queue.
//! Handles retries, dead-lettering, stale job release and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use credsync_core::{
    exponential_backoff, CredentialJob, DeadLetterStore, JobQueue, NewDlqEntry, SyncFlags,
    CREDENTIAL_PROCESSING_JOB,
};
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::processor::{CredentialProcessor, ProcessOutcome};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of jobs processed concurrently.
    pub concurrency: usize,

    /// How often to poll the queue (in milliseconds).
    pub poll_interval_ms: u64,

    /// Jobs left in `processing` longer than this are handed back (in seconds).
    pub stale_after_secs: u64,

    /// Maximum jobs claimed per poll.
    pub batch_size: u32,

    /// Base delay for exponential retry backoff (in milliseconds).
    pub retry_backoff_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval_ms: 1000,
            stale_after_secs: 300,
            batch_size: 10,
            retry_backoff_base_ms: 5000,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn from_flags(flags: &SyncFlags) -> Self {
        Self {
            concurrency: flags.worker_concurrency.max(1),
            retry_backoff_base_ms: flags.retry_backoff_base_ms,
            ..Self::default()
        }
    }
}

/// What became of one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Completed,
    Retrying,
    DeadLettered,
}

/// Everything a single job run needs. Cloned into each spawned task.
#[derive(Clone)]
struct JobContext {
    processor: Arc<CredentialProcessor>,
    queue: Arc<dyn JobQueue>,
    dlq: Arc<dyn DeadLetterStore>,
    retry_backoff_base_ms: u64,
}

/// Worker pool over the durable credential queue.
pub struct CredentialWorker {
    ctx: JobContext,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl CredentialWorker {
    pub fn new(
        processor: Arc<CredentialProcessor>,
        queue: Arc<dyn JobQueue>,
        dlq: Arc<dyn DeadLetterStore>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx: JobContext {
                processor,
                queue,
                dlq,
                retry_backoff_base_ms: config.retry_backoff_base_ms,
            },
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token fires, then wait for in-flight jobs.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting credential worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Worker shutdown requested, stopping poll loop");
                    break;
                }
                _ = poll_interval.tick() => {
                    self.release_stale_jobs().await;
                    self.poll_and_process(&semaphore).await;
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        let permits = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(permits).await;
        info!("Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Claim one batch and process it to completion on the current task.
    pub async fn run_once(&self) -> Vec<JobDisposition> {
        let jobs = match self.ctx.queue.claim_due(self.config.batch_size, Utc::now()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim jobs");
                return Vec::new();
            }
        };

        let mut dispositions = Vec::with_capacity(jobs.len());
        for job in jobs {
            dispositions.push(self.ctx.handle(job).await);
        }
        dispositions
    }

    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        let free = u32::try_from(semaphore.available_permits()).unwrap_or(u32::MAX);
        if free == 0 {
            debug!("All worker slots busy, skipping poll");
            return;
        }

        let jobs = match self
            .ctx
            .queue
            .claim_due(free.min(self.config.batch_size), Utc::now())
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim jobs");
                return;
            }
        };

        if jobs.is_empty() {
            return;
        }
        debug!(count = jobs.len(), "Claimed jobs for processing");

        for job in jobs {
            // Claims never exceed free permits, so this only waits if a
            // permit was taken between the check and the claim.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                ctx.handle(job).await;
            });
        }
    }

    async fn release_stale_jobs(&self) {
        let window = chrono::Duration::seconds(
            i64::try_from(self.config.stale_after_secs).unwrap_or(i64::MAX / 1000),
        );
        match self.ctx.queue.release_stale(Utc::now() - window).await {
            Ok(count) if count > 0 => warn!(count, "Released stale jobs"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to release stale jobs"),
        }
    }
}

impl JobContext {
    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, idempotency_key = %job.idempotency_key, attempt = job.attempts)
    )]
    async fn handle(&self, job: CredentialJob) -> JobDisposition {
        let start = std::time::Instant::now();
        let result = self.processor.process(&job.payload).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                if let ProcessOutcome::Persisted { status, .. } = &outcome {
                    debug!(duration_ms, status = %status, "Job completed");
                }
                if let Err(e) = self.queue.complete(job.id).await {
                    error!(error = %e, "Failed to mark job complete");
                }
                JobDisposition::Completed
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(duration_ms, error = %reason, retryable = e.is_retryable(), "Job failed");

                if e.is_retryable() && job.attempts_remaining() {
                    self.retry(&job, &reason).await;
                    return JobDisposition::Retrying;
                }
                self.dead_letter(&job, reason).await
            }
        }
    }

    async fn retry(&self, job: &CredentialJob, reason: &str) {
        let delay = exponential_backoff(self.retry_backoff_base_ms, job.attempts);
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        info!(delay_ms = delay.as_millis() as u64, "Scheduling retry");
        if let Err(e) = self.queue.schedule_retry(job.id, run_at, reason).await {
            error!(error = %e, "Failed to schedule retry");
        }
    }

    async fn dead_letter(&self, job: &CredentialJob, reason: String) -> JobDisposition {
        let entry = NewDlqEntry {
            job_type: CREDENTIAL_PROCESSING_JOB.to_string(),
            job_id: job.idempotency_key.clone(),
            reason: reason.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
        };

        match self.dlq.add_entry(entry).await {
            Ok(entry) => {
                tracing::info!(
                    target: "dlq",
                    dlq_id = %entry.id,
                    job_id = %job.id,
                    idempotency_key = %job.idempotency_key,
                    attempts = job.attempts,
                    reason = %reason,
                    "Credential job moved to dead letter queue"
                );
                if let Err(e) = self.queue.mark_dead(job.id, &reason).await {
                    error!(error = %e, "Failed to mark job dead");
                }
                JobDisposition::DeadLettered
            }
            Err(e) => {
                // Keep the job alive rather than lose it.
                error!(error = %e, "Failed to add job to dead letter queue");
                self.retry(job, &reason).await;
                JobDisposition::Retrying
            }
        }
    }
}

impl std::fmt::Debug for CredentialWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialWorker")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
