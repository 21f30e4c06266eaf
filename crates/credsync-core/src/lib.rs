//! credsync core
//!
//! Shared types for the external credential sync pipeline.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers
//! - [`flags`] - Process-wide sync toggles
//! - [`credential`] - Raw, canonical and persisted credential shapes
//! - [`idempotency`] - Processing dedup keys
//! - [`directory`] - Issuer and learner read models, sync state
//! - [`job`] - Queue jobs and dead-letter entries
//! - [`store`] - Storage contracts
//! - [`error`] - Storage error type

pub mod credential;
pub mod directory;
pub mod error;
pub mod flags;
pub mod idempotency;
pub mod ids;
pub mod job;
pub mod store;

pub use credential::{
    CanonicalCredential, CredentialStatus, ExternalCredentialRecord, MatchDetails, MatchResult,
    MatchType, NewExternalCredential, RawProviderCredential, SignatureType, VerificationMethod,
    VerificationResult,
};
pub use directory::{phone_suffix, IssuerProfile, LearnerCandidate, SyncState};
pub use error::{StoreError, StoreResult};
pub use flags::{exponential_backoff, SyncFlags};
pub use idempotency::{IdempotencyKey, IdempotencyRecord};
pub use ids::{CredentialRecordId, DlqEntryId, IssuerId, JobId, LearnerId, ParseIdError};
pub use job::{
    CredentialJob, DlqEntry, EnqueueOutcome, JobPayload, JobStatus, NewCredentialJob, NewDlqEntry,
    QueueDepth, CREDENTIAL_PROCESSING_JOB,
};
pub use store::{
    CredentialFilter, CredentialStore, DeadLetterStore, IdempotencyStore, InsertOutcome,
    IssuerDirectory, JobQueue, JwksSnapshot, JwksSnapshotStore, LearnerDirectory, Page,
    StatusCounts, SyncStateStore,
};
