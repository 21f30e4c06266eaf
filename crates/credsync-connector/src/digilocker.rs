//! DigiLocker placeholder connector.
//!
//! Registered so issuers can already be configured against the provider.
//! Pulls return nothing, subscription and verification are refused, and
//! pushes are never trusted.

use async_trait::async_trait;
use chrono::Utc;
use credsync_core::{
    CanonicalCredential, IssuerProfile, RawProviderCredential, SignatureType, VerificationMethod,
    VerificationResult,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ConnectorResult;
use crate::fields::{first_datetime, first_string, lookup};
use crate::traits::{CredentialConnector, FetchOptions, FetchPage, WebhookNotice, WebhookSubscription};

pub const DIGILOCKER_PROVIDER: &str = "digilocker";

#[derive(Debug, Clone, Default)]
pub struct DigiLockerConnector;

impl DigiLockerConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialConnector for DigiLockerConnector {
    fn provider_id(&self) -> &str {
        DIGILOCKER_PROVIDER
    }

    fn display_name(&self) -> &str {
        "DigiLocker"
    }

    async fn fetch_credentials(
        &self,
        issuer: &IssuerProfile,
        _options: &FetchOptions,
    ) -> ConnectorResult<FetchPage> {
        debug!(issuer_id = %issuer.id, "DigiLocker pull is not implemented, returning empty page");
        Ok(FetchPage::empty())
    }

    async fn subscribe_webhook(
        &self,
        _issuer: &IssuerProfile,
        _callback_url: &str,
    ) -> ConnectorResult<WebhookSubscription> {
        Ok(WebhookSubscription::unsupported(
            "DigiLocker webhook subscription is not implemented",
        ))
    }

    async fn verify(
        &self,
        _credential: &RawProviderCredential,
        _jwks_url: Option<&str>,
    ) -> VerificationResult {
        VerificationResult::rejected(
            VerificationMethod::None,
            "DigiLocker verification is not implemented",
        )
    }

    fn normalize(&self, raw: &RawProviderCredential) -> CanonicalCredential {
        let body = match lookup(&raw.raw_data, "document") {
            Some(v @ Value::Object(_)) => v,
            _ => &raw.raw_data,
        };

        CanonicalCredential {
            provider_credential_id: raw.id.clone(),
            recipient_email: first_string(body, &["email", "holder_email"]).map(|e| e.to_lowercase()),
            recipient_phone: None,
            recipient_name: first_string(body, &["name", "holder_name"]),
            recipient_dob: None,
            certificate_title: first_string(body, &["doc_type", "title"])
                .unwrap_or_else(|| "DigiLocker Document".to_string()),
            issue_date: first_datetime(body, &["issued_at", "date"]).unwrap_or_else(Utc::now),
            expiry_date: None,
            skills: Vec::new(),
            metadata: json!({"provider": DIGILOCKER_PROVIDER}),
        }
    }

    fn parse_webhook(&self, body: &Value) -> Option<WebhookNotice> {
        let id = first_string(body, &["uri", "document_id", "id"])?;
        let partner_id = first_string(body, &["issuer_id", "partner_id"])?;
        Some(WebhookNotice {
            partner_id,
            credential: RawProviderCredential {
                id,
                signed_payload: body.clone(),
                signature_type: SignatureType::None,
                signature_header: None,
                raw_data: body.clone(),
            },
        })
    }

    fn verify_webhook_signature(&self, _payload: &[u8], _signature: &str, _secret: Option<&str>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credsync_core::IssuerId;

    fn issuer() -> IssuerProfile {
        IssuerProfile {
            id: IssuerId::new(),
            name: "Board".into(),
            provider: DIGILOCKER_PROVIDER.into(),
            registry_id: Some("DL1".into()),
            accept_external: true,
            jwks_url: None,
        }
    }

    #[tokio::test]
    async fn test_stub_behaviour() {
        let c = DigiLockerConnector::new();
        let page = c
            .fetch_credentials(&issuer(), &FetchOptions::new(50))
            .await
            .unwrap();
        assert!(page.credentials.is_empty());
        assert!(!page.has_more);

        let sub = c.subscribe_webhook(&issuer(), "https://cb").await.unwrap();
        assert!(!sub.subscribed);
        assert!(!sub.requires_approval);

        let notice = c
            .parse_webhook(&json!({"uri": "in.gov.doc-1", "issuer_id": "DL1", "name": "Asha"}))
            .unwrap();
        assert!(!c.verify(&notice.credential, None).await.verified);
        assert!(!c.verify_webhook_signature(b"{}", "00", Some("secret")));
    }

    #[test]
    fn test_normalize_defaults() {
        let c = DigiLockerConnector::new();
        let raw = RawProviderCredential {
            id: "doc-1".into(),
            signed_payload: Value::Null,
            signature_type: SignatureType::None,
            signature_header: None,
            raw_data: json!({"email": "A@X.com", "name": "Asha"}),
        };
        let canonical = c.normalize(&raw);
        assert_eq!(canonical.recipient_email.as_deref(), Some("a@x.com"));
        assert_eq!(canonical.recipient_name.as_deref(), Some("Asha"));
        assert_eq!(canonical.certificate_title, "DigiLocker Document");
    }
}
