//! Credential processing.
//!
//! One queued credential goes through
//! `idempotency check -> verify -> normalize -> encrypt -> match -> persist`.
//! The record and its idempotency mark are written together, so a
//! credential is never marked without being stored.

use std::sync::Arc;

use chrono::Utc;
use credsync_connector::ConnectorRegistry;
use credsync_core::{
    CredentialRecordId, CredentialStatus, InsertOutcome, IssuerId, JobPayload, MatchType,
    NewExternalCredential, StoreError, VerificationMethod,
};
use credsync_kms::{encrypt_json, Kms, KmsError};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::matching::MatchingEngine;
use crate::stores::SyncStores;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("Issuer not found: {issuer_id}")]
    IssuerNotFound { issuer_id: IssuerId },

    #[error("Signature verification failed: {reason}")]
    VerificationFailed {
        method: VerificationMethod,
        reason: String,
    },

    /// The signature could not be checked, for example because the
    /// provider's key set was unreachable.
    #[error("Signature verifier unavailable: {reason}")]
    VerifierUnavailable {
        method: VerificationMethod,
        reason: String,
    },

    #[error("Payload encryption failed: {0}")]
    Encryption(#[from] KmsError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Outages of storage, the key service or a provider's key set are
    /// worth another attempt. Integrity and configuration failures would
    /// fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Encryption(e) => e.is_transient(),
            Self::VerifierUnavailable { .. } => true,
            Self::UnknownProvider { .. }
            | Self::IssuerNotFound { .. }
            | Self::VerificationFailed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The idempotency key was already marked. Nothing was written.
    AlreadyProcessed,
    Persisted {
        record_id: CredentialRecordId,
        status: CredentialStatus,
        match_type: MatchType,
        /// A concurrent attempt had already stored the same credential.
        duplicate: bool,
    },
}

pub struct CredentialProcessor {
    connectors: Arc<ConnectorRegistry>,
    stores: SyncStores,
    matcher: MatchingEngine,
    kms: Arc<dyn Kms>,
}

impl CredentialProcessor {
    pub fn new(
        connectors: Arc<ConnectorRegistry>,
        stores: SyncStores,
        kms: Arc<dyn Kms>,
        match_threshold: f64,
    ) -> Self {
        let matcher = MatchingEngine::new(stores.learners.clone(), match_threshold);
        Self {
            connectors,
            stores,
            matcher,
            kms,
        }
    }

    #[must_use]
    pub fn match_threshold(&self) -> f64 {
        self.matcher.threshold()
    }

    #[instrument(
        skip(self, payload),
        fields(
            provider = %payload.provider,
            issuer_id = %payload.issuer_id,
            credential_id = %payload.raw_credential.id,
        )
    )]
    pub async fn process(&self, payload: &JobPayload) -> Result<ProcessOutcome, ProcessError> {
        let key = payload.idempotency_key();
        if self.stores.idempotency.is_processed(&key).await? {
            info!(idempotency_key = %key, "Skipping already processed credential");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let connector = self.connectors.get(&payload.provider).ok_or_else(|| {
            ProcessError::UnknownProvider {
                provider: payload.provider.clone(),
            }
        })?;

        let issuer = self
            .stores
            .issuers
            .get_issuer(payload.issuer_id)
            .await?
            .ok_or(ProcessError::IssuerNotFound {
                issuer_id: payload.issuer_id,
            })?;

        let raw = &payload.raw_credential;
        let verification = connector.verify(raw, issuer.jwks_url.as_deref()).await;
        if !verification.verified {
            let method = verification.method;
            let reason = verification
                .error
                .unwrap_or_else(|| "credential not verified".to_string());
            if verification.transient {
                return Err(ProcessError::VerifierUnavailable { method, reason });
            }
            return Err(ProcessError::VerificationFailed { method, reason });
        }

        let canonical = connector.normalize(raw);
        let encrypted_raw = encrypt_json(self.kms.as_ref(), &raw.raw_data).await?;
        let matched = self.matcher.match_credential(&canonical).await?;
        let status = CredentialStatus::for_confidence(matched.confidence, self.matcher.threshold());

        let received_at = Utc::now();
        let new = NewExternalCredential {
            issuer_id: payload.issuer_id,
            provider: payload.provider.clone(),
            provider_credential_id: canonical.provider_credential_id.clone(),
            canonical,
            encrypted_raw,
            signature_verified: verification.verified,
            verification_method: verification.method,
            match_confidence: matched.confidence,
            match_type: matched.match_type,
            learner_id: matched.learner_id,
            status,
            received_at,
        };

        let outcome = self.stores.credentials.insert_and_mark(new, &key).await?;
        let duplicate = matches!(outcome, InsertOutcome::Duplicate(_));
        let record = outcome.record();

        if let Err(e) = self
            .stores
            .sync_state
            .record_sync(payload.issuer_id, &payload.provider, received_at)
            .await
        {
            warn!(error = %e, "Failed to advance issuer sync state");
        }

        info!(
            record_id = %record.id,
            status = %record.status,
            match_type = %record.match_type,
            confidence = record.match_confidence,
            verification_method = %record.verification_method,
            duplicate,
            "External credential processed"
        );

        Ok(ProcessOutcome::Persisted {
            record_id: record.id,
            status: record.status,
            match_type: record.match_type,
            duplicate,
        })
    }
}

impl std::fmt::Debug for CredentialProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProcessor")
            .field("connectors", &self.connectors)
            .field("matcher", &self.matcher)
            .field("kms", &self.kms.key_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outages_retry_and_rejections_do_not() {
        assert!(ProcessError::VerifierUnavailable {
            method: VerificationMethod::Jws,
            reason: "JWKS unavailable".into(),
        }
        .is_retryable());
        assert!(ProcessError::Encryption(KmsError::Unavailable("throttled".into())).is_retryable());
        assert!(!ProcessError::Encryption(KmsError::InvalidKey("short".into())).is_retryable());
    }

    #[test]
    fn test_only_transient_storage_errors_retry() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(ProcessError::Store(StoreError::unavailable("down", io)).is_retryable());
        assert!(!ProcessError::Store(StoreError::Constraint("dup".into())).is_retryable());
        assert!(!ProcessError::VerificationFailed {
            method: VerificationMethod::Jws,
            reason: "bad".into(),
        }
        .is_retryable());
        assert!(!ProcessError::UnknownProvider {
            provider: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_verification_message() {
        let err = ProcessError::VerificationFailed {
            method: VerificationMethod::Jws,
            reason: "Key k1 not found in JWKS".into(),
        };
        assert_eq!(
            err.to_string(),
            "Signature verification failed: Key k1 not found in JWKS"
        );
    }
}
