//! Queue jobs and dead-letter entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::credential::RawProviderCredential;
use crate::idempotency::IdempotencyKey;
use crate::ids::{DlqEntryId, IssuerId, JobId};

/// Job type recorded on dead-letter entries produced by the processor.
pub const CREDENTIAL_PROCESSING_JOB: &str = "credential_processing";

/// What a credential job carries. Also the DLQ payload, so a retry needs no
/// provider round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub provider: String,
    pub issuer_id: IssuerId,
    pub raw_credential: RawProviderCredential,
}

impl JobPayload {
    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.provider, self.issuer_id, &self.raw_credential.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    /// Pending and processing jobs hold their idempotency key.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCredentialJob {
    pub idempotency_key: IdempotencyKey,
    pub payload: JobPayload,
    pub max_attempts: u32,
}

impl NewCredentialJob {
    #[must_use]
    pub fn new(payload: JobPayload, max_attempts: u32) -> Self {
        Self {
            idempotency_key: payload.idempotency_key(),
            payload,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialJob {
    pub id: JobId,
    pub idempotency_key: IdempotencyKey,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Attempts started so far, including the one in progress.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialJob {
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.payload.provider
    }

    #[must_use]
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(JobId),
    /// An active job already holds the idempotency key.
    Duplicate,
}

impl EnqueueOutcome {
    #[must_use]
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub processing: u64,
    pub dead: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDlqEntry {
    pub job_type: String,
    pub job_id: IdempotencyKey,
    pub reason: String,
    pub payload: JobPayload,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlqEntry {
    pub id: DlqEntryId,
    pub job_type: String,
    pub job_id: IdempotencyKey,
    pub reason: String,
    pub payload: JobPayload,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}
