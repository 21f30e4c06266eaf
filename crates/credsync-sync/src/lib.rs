//! credsync sync
//!
//! The moving parts of external credential sync: learner matching, the
//! per-credential processor, the durable queue worker, pull-based polling,
//! reconciliation, the scheduler driving both, the dead letter queue and
//! the webhook intake.
//!
//! ```text
//!  webhook ──► IntakeSender ─mpsc─► WebhookIntake ─┐
//!                                                  ├─► CredentialEnqueuer ──► JobQueue
//!  SyncScheduler ──► Poller / Reconciler ──────────┘                            │
//!                                                                               ▼
//!  DlqService ◄── DeadLetterStore ◄── CredentialWorker ──► CredentialProcessor ──► CredentialStore
//! ```

pub mod dlq;
pub mod enqueue;
pub mod intake;
pub mod matching;
pub mod poller;
pub mod processor;
pub mod reconciliation;
pub mod scheduler;
pub mod stores;
pub mod worker;

pub use dlq::{BulkRetryResponse, DlqEntryList, DlqError, DlqService, RetryResponse};
pub use enqueue::CredentialEnqueuer;
pub use intake::{
    channel as intake_channel, DropReason, IntakeError, IntakeOutcome, IntakeSender,
    WebhookEnvelope, WebhookIntake, DEFAULT_INTAKE_CAPACITY,
};
pub use matching::{name_similarity, normalize_name, MatchingEngine};
pub use poller::{IssuerPollFailure, PollError, PollReport, Poller, SweepReport};
pub use processor::{CredentialProcessor, ProcessError, ProcessOutcome};
pub use reconciliation::{select_stale, Reconciler};
pub use scheduler::{SchedulerConfig, SchedulerStatus, SweepSummary, SyncScheduler};
pub use stores::SyncStores;
pub use worker::{CredentialWorker, JobDisposition, WorkerConfig};
