//! The per-provider connector contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{CanonicalCredential, IssuerProfile, RawProviderCredential, VerificationResult};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorResult;
use crate::signature;

/// Parameters for one page of a credential pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only credentials issued or updated after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Opaque provider cursor from the previous page.
    pub cursor: Option<String>,
    pub page_size: u32,
    /// Ignore `since` and walk the whole set.
    pub full_sync: bool,
}

impl FetchOptions {
    #[must_use]
    pub fn new(page_size: u32) -> Self {
        Self {
            since: None,
            cursor: None,
            page_size,
            full_sync: false,
        }
    }

    /// The `since` bound actually sent to the provider.
    #[must_use]
    pub fn effective_since(&self) -> Option<DateTime<Utc>> {
        if self.full_sync {
            None
        } else {
            self.since
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    pub credentials: Vec<RawProviderCredential>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl FetchPage {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            credentials: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub subscribed: bool,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookSubscription {
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            subscribed: false,
            requires_approval: false,
            webhook_id: None,
            message: Some(message.into()),
        }
    }
}

/// What a provider push told us.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookNotice {
    /// The owning partner's id in the provider registry.
    pub partner_id: String,
    pub credential: RawProviderCredential,
}

/// One external credential provider.
///
/// Implementations are registered once at startup in a
/// [`ConnectorRegistry`](crate::ConnectorRegistry) and shared across the
/// webhook intake, the poller and every worker.
#[async_trait]
pub trait CredentialConnector: Send + Sync {
    /// Stable provider id used in URLs, idempotency keys and issuer rows.
    fn provider_id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn supports_webhooks(&self) -> bool {
        false
    }

    /// Pull one page of credentials for `issuer`. Re-callable with the same
    /// cursor.
    async fn fetch_credentials(
        &self,
        issuer: &IssuerProfile,
        options: &FetchOptions,
    ) -> ConnectorResult<FetchPage>;

    async fn subscribe_webhook(
        &self,
        issuer: &IssuerProfile,
        callback_url: &str,
    ) -> ConnectorResult<WebhookSubscription>;

    /// Check a credential's provenance.
    ///
    /// Never errors: every failure is reported through
    /// [`VerificationResult::error`]. Results carrying a `*_signature_meta`
    /// method were accepted on an upstream flag, not a signature check.
    async fn verify(
        &self,
        credential: &RawProviderCredential,
        jwks_url: Option<&str>,
    ) -> VerificationResult;

    /// Map the provider's shape to the canonical one. Missing optional
    /// fields become `None`.
    fn normalize(&self, raw: &RawProviderCredential) -> CanonicalCredential;

    /// Pull the partner id and credential out of a push body.
    fn parse_webhook(&self, body: &serde_json::Value) -> Option<WebhookNotice>;

    /// HMAC-SHA256 check of a push body. No secret means `false`.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, secret: Option<&str>) -> bool {
        signature::verify_webhook_signature(payload, signature, secret)
    }
}
