//! The set of store handles the pipeline runs against.

use std::sync::Arc;

use credsync_core::{
    CredentialStore, DeadLetterStore, IdempotencyStore, IssuerDirectory, JobQueue,
    LearnerDirectory, SyncStateStore,
};

/// Shared handles to every store contract the pipeline uses.
///
/// Built once at startup. Cloning is cheap.
#[derive(Clone)]
pub struct SyncStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub learners: Arc<dyn LearnerDirectory>,
    pub issuers: Arc<dyn IssuerDirectory>,
    pub sync_state: Arc<dyn SyncStateStore>,
    pub queue: Arc<dyn JobQueue>,
    pub dlq: Arc<dyn DeadLetterStore>,
}

impl SyncStores {
    /// Use one backend for every contract.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: CredentialStore
            + IdempotencyStore
            + LearnerDirectory
            + IssuerDirectory
            + SyncStateStore
            + JobQueue
            + DeadLetterStore
            + 'static,
    {
        Self {
            credentials: backend.clone(),
            idempotency: backend.clone(),
            learners: backend.clone(),
            issuers: backend.clone(),
            sync_state: backend.clone(),
            queue: backend.clone(),
            dlq: backend,
        }
    }
}

impl std::fmt::Debug for SyncStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStores").finish_non_exhaustive()
    }
}
