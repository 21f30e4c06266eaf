//! Idempotency keys for credential processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{CredentialRecordId, IssuerId};

/// Stable dedup key `provider:issuer:credential`.
///
/// Used both as the queue's dedup key and as the processed-credential key,
/// so a credential redelivered by webhook and then seen again by the poller
/// collapses to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    #[must_use]
    pub fn new(provider: &str, issuer_id: IssuerId, credential_id: &str) -> Self {
        Self(format!("{provider}:{issuer_id}:{credential_id}"))
    }

    /// Wrap a key read back from storage.
    #[must_use]
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A key that has been marked processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub credential_id: CredentialRecordId,
    pub processed_at: DateTime<Utc>,
}
