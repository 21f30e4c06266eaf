//! Webhook intake.
//!
//! The HTTP handler acknowledges a push as soon as the raw body is on a
//! bounded channel. A single consumer task owned by the application then
//! resolves the issuer, checks the HMAC signature and puts the credential
//! on the durable queue. Nothing downstream of the channel can change the
//! response the provider already got.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use credsync_connector::ConnectorRegistry;
use credsync_core::{EnqueueOutcome, IssuerDirectory, JobId, StoreError};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::enqueue::CredentialEnqueuer;

pub const DEFAULT_INTAKE_CAPACITY: usize = 1024;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// One received push, exactly as it arrived.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub provider: String,
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl WebhookEnvelope {
    pub fn new(provider: impl Into<String>, body: impl Into<Vec<u8>>, signature: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            body: body.into(),
            signature,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("Webhook intake is closed")]
    Closed,

    #[error("Webhook intake did not accept the push within {0:?}")]
    Timeout(Duration),
}

/// Producer half, held by the HTTP layer.
#[derive(Debug, Clone)]
pub struct IntakeSender {
    tx: mpsc::Sender<WebhookEnvelope>,
    ack_timeout: Duration,
}

impl IntakeSender {
    /// Wait at most the ack timeout for channel capacity.
    pub async fn submit(&self, envelope: WebhookEnvelope) -> Result<(), IntakeError> {
        match tokio::time::timeout(self.ack_timeout, self.tx.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(IntakeError::Closed),
            Err(_) => Err(IntakeError::Timeout(self.ack_timeout)),
        }
    }

    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}

/// Bounded intake channel.
#[must_use]
pub fn channel(capacity: usize, ack_timeout: Duration) -> (IntakeSender, mpsc::Receiver<WebhookEnvelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IntakeSender { tx, ack_timeout }, rx)
}

/// Why a push was dropped without being queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownProvider,
    MalformedJson,
    UnrecognizedPayload,
    IssuerNotFound,
    NotAccepting,
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Enqueued(JobId),
    AlreadyQueued,
    Dropped(DropReason),
}

/// Consumer side: turns envelopes into queued jobs.
pub struct WebhookIntake {
    connectors: Arc<ConnectorRegistry>,
    issuers: Arc<dyn IssuerDirectory>,
    enqueuer: CredentialEnqueuer,
    secrets: HashMap<String, SecretString>,
}

impl WebhookIntake {
    pub fn new(
        connectors: Arc<ConnectorRegistry>,
        issuers: Arc<dyn IssuerDirectory>,
        enqueuer: CredentialEnqueuer,
    ) -> Self {
        Self {
            connectors,
            issuers,
            enqueuer,
            secrets: HashMap::new(),
        }
    }

    /// Require a valid HMAC signature on every push from `provider`.
    #[must_use]
    pub fn with_secret(mut self, provider: impl Into<String>, secret: SecretString) -> Self {
        let provider = provider.into();
        if secret.expose_secret().is_empty() {
            return self;
        }
        self.secrets.insert(provider, secret);
        self
    }

    #[must_use]
    pub fn has_secret(&self, provider: &str) -> bool {
        self.secrets.contains_key(provider)
    }

    /// Consume envelopes until `shutdown` fires, then drain what is already
    /// buffered.
    pub async fn run(&self, mut rx: mpsc::Receiver<WebhookEnvelope>, shutdown: CancellationToken) {
        info!("Webhook intake started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => self.consume(envelope).await,
                    None => {
                        info!("Webhook intake channel closed");
                        return;
                    }
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(envelope) = rx.recv().await {
            self.consume(envelope).await;
            drained += 1;
        }
        info!(drained, "Webhook intake stopped");
    }

    async fn consume(&self, envelope: WebhookEnvelope) {
        match self.handle(envelope).await {
            Ok(outcome) => debug!(?outcome, "Webhook handled"),
            Err(e) => error!(error = %e, "Failed to enqueue webhook credential"),
        }
    }

    #[instrument(skip(self, envelope), fields(provider = %envelope.provider))]
    pub async fn handle(&self, envelope: WebhookEnvelope) -> Result<IntakeOutcome, StoreError> {
        let Some(connector) = self.connectors.get(&envelope.provider) else {
            warn!("Webhook for unknown provider");
            return Ok(IntakeOutcome::Dropped(DropReason::UnknownProvider));
        };

        let body: serde_json::Value = match serde_json::from_slice(&envelope.body) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, bytes = envelope.body.len(), "Malformed webhook body");
                return Ok(IntakeOutcome::Dropped(DropReason::MalformedJson));
            }
        };

        let Some(notice) = connector.parse_webhook(&body) else {
            warn!("Webhook missing partner or credential id");
            return Ok(IntakeOutcome::Dropped(DropReason::UnrecognizedPayload));
        };

        let provider = connector.provider_id().to_string();
        let Some(issuer) = self
            .issuers
            .find_by_registry_id(&provider, &notice.partner_id)
            .await?
        else {
            warn!(registry_id = %notice.partner_id, "No issuer found for registry id");
            return Ok(IntakeOutcome::Dropped(DropReason::IssuerNotFound));
        };

        if !issuer.accept_external {
            info!(issuer_id = %issuer.id, "Issuer does not accept external credentials");
            return Ok(IntakeOutcome::Dropped(DropReason::NotAccepting));
        }

        if let Some(secret) = self.secrets.get(&provider) {
            let valid = envelope.signature.as_deref().is_some_and(|sig| {
                connector.verify_webhook_signature(&envelope.body, sig, Some(secret.expose_secret()))
            });
            if !valid {
                warn!(
                    issuer_id = %issuer.id,
                    credential_id = %notice.credential.id,
                    signed = envelope.signature.is_some(),
                    "Invalid webhook signature"
                );
                return Ok(IntakeOutcome::Dropped(DropReason::InvalidSignature));
            }
        }

        let mut credential = notice.credential;
        credential.signature_header = envelope.signature;
        let credential_id = credential.id.clone();

        let outcome = match self.enqueuer.enqueue(&provider, issuer.id, credential).await? {
            EnqueueOutcome::Enqueued(job_id) => IntakeOutcome::Enqueued(job_id),
            EnqueueOutcome::Duplicate => IntakeOutcome::AlreadyQueued,
        };
        info!(issuer_id = %issuer.id, credential_id = %credential_id, "Webhook credential accepted");
        Ok(outcome)
    }
}

impl std::fmt::Debug for WebhookIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIntake")
            .field("connectors", &self.connectors)
            .field("signed_providers", &self.secrets.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
