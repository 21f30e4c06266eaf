//! NSDC skills registry connector.
//!
//! Talks to the registry's partner API: OAuth client credentials, cursor
//! paginated credential pulls, webhook subscription, and JWS signatures
//! checked against the registry's JWKS.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use credsync_core::{
    CanonicalCredential, IssuerProfile, RawProviderCredential, SignatureType, VerificationMethod,
    VerificationResult,
};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::fields::{
    first_date, first_datetime, first_string, looks_like_compact_jws, lookup, string_list,
    unverified_jws_claims,
};
use crate::jwks::JwksCache;
use crate::jws::verify_compact_jws;
use crate::token::OAuthTokenCache;
use crate::traits::{CredentialConnector, FetchOptions, FetchPage, WebhookNotice, WebhookSubscription};

pub const NSDC_PROVIDER: &str = "nsdc";

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct NsdcConfig {
    /// Registry API root, e.g. `https://apisetu.example.gov.in`.
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Overrides `{base_url}/.well-known/jwks.json`.
    pub jwks_url: Option<String>,
}

impl NsdcConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret,
            jwks_url: None,
        }
    }

    #[must_use]
    pub fn default_jwks_url(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.base_url))
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "id")]
    webhook_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub struct NsdcConnector {
    config: NsdcConfig,
    http: reqwest::Client,
    tokens: OAuthTokenCache,
    jwks: JwksCache,
}

impl NsdcConnector {
    /// `jwks` is shared with any other connector that verifies JWS.
    pub fn new(config: NsdcConfig, jwks: JwksCache) -> ConnectorResult<Self> {
        url::Url::parse(&config.base_url).map_err(|e| {
            ConnectorError::invalid_configuration(format!("invalid NSDC base URL: {e}"))
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("credsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::invalid_configuration(format!("HTTP client: {e}")))?;

        let tokens = OAuthTokenCache::new(
            http.clone(),
            format!("{}/oauth/token", config.base_url),
            config.client_id.clone(),
            config.client_secret.clone(),
        );

        Ok(Self {
            config,
            http,
            tokens,
            jwks,
        })
    }

    fn registry_id<'a>(&self, issuer: &'a IssuerProfile) -> ConnectorResult<&'a str> {
        issuer
            .registry_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::invalid_configuration(format!(
                    "issuer {} has no NSDC registry id",
                    issuer.id
                ))
            })
    }

    fn partner_url(&self, registry_id: &str, tail: &str) -> ConnectorResult<url::Url> {
        let mut url = url::Url::parse(&self.config.base_url)
            .map_err(|e| ConnectorError::invalid_configuration(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| ConnectorError::invalid_configuration("base URL cannot hold a path"))?
            .pop_if_empty()
            .extend(["api", "partners", registry_id, tail]);
        Ok(url)
    }

    /// Send an authorized request, dropping the cached token on 401.
    async fn send_authorized(&self, request: reqwest::RequestBuilder) -> ConnectorResult<reqwest::Response> {
        let token = self.tokens.get_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConnectorError::from_status(status, body))
    }
}

/// Map one item of the pull response to a raw credential.
#[must_use]
pub fn raw_from_item(item: &Value) -> Option<RawProviderCredential> {
    let id = first_string(item, &["credential_id", "id"])?;
    let signed_payload = lookup(item, "signed_credential")
        .or_else(|| lookup(item, "credential"))
        .cloned()
        .unwrap_or(Value::Null);

    Some(RawProviderCredential {
        id,
        signed_payload,
        signature_type: detect_signature_type(item),
        signature_header: None,
        raw_data: item.clone(),
    })
}

/// JWS when `signed_credential` is a compact token, else the declared type.
#[must_use]
pub fn detect_signature_type(item: &Value) -> SignatureType {
    if let Some(token) = lookup(item, "signed_credential").and_then(Value::as_str) {
        if looks_like_compact_jws(token) {
            return SignatureType::Jws;
        }
    }
    match first_string(item, &["signature_type"])
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jws") => SignatureType::Jws,
        Some("pdf") => SignatureType::Pdf,
        Some("dsc") => SignatureType::Dsc,
        Some("hmac") => SignatureType::Hmac,
        _ => SignatureType::None,
    }
}

fn signature_meta_valid(raw: &RawProviderCredential) -> bool {
    ["signature_meta.valid", "signatureMeta.valid"]
        .iter()
        .any(|p| lookup(&raw.raw_data, p).and_then(Value::as_bool) == Some(true))
}

/// Claim paths that carry the provider's credential id inside a token.
const SIGNED_ID_PATHS: &[&str] = &["credential_id", "jti", "vc.id"];

/// Claims of a JWS-typed credential. `None` for every other signature type.
fn signed_claims(raw: &RawProviderCredential) -> Option<Value> {
    if raw.signature_type != SignatureType::Jws {
        return None;
    }
    raw.compact_jws().and_then(unverified_jws_claims)
}

fn claims_subject(claims: &Value) -> Value {
    match lookup(claims, "vc.credentialSubject").or_else(|| lookup(claims, "credentialSubject")) {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => claims.clone(),
    }
}

/// The object holding the credential fields and the object consulted when
/// a field is missing from it.
///
/// For JWS both come from the token claims. Unsigned siblings such as
/// `credential` never describe a signed credential.
fn credential_sources(raw: &RawProviderCredential) -> (Value, Value) {
    if raw.signature_type == SignatureType::Jws {
        let claims = signed_claims(raw).unwrap_or_else(|| Value::Object(Map::new()));
        return (claims_subject(&claims), claims);
    }
    for key in ["credential", "credentialSubject"] {
        if let Some(v @ Value::Object(_)) = lookup(&raw.raw_data, key) {
            return (v.clone(), raw.raw_data.clone());
        }
    }
    if let Some(claims) = raw.compact_jws().and_then(unverified_jws_claims) {
        return (claims_subject(&claims), raw.raw_data.clone());
    }
    (raw.raw_data.clone(), raw.raw_data.clone())
}

/// The credential id, taken from the token when it names one.
fn credential_id(raw: &RawProviderCredential) -> String {
    signed_claims(raw)
        .and_then(|claims| first_string(&claims, SIGNED_ID_PATHS))
        .unwrap_or_else(|| raw.id.clone())
}

#[async_trait]
impl CredentialConnector for NsdcConnector {
    fn provider_id(&self) -> &str {
        NSDC_PROVIDER
    }

    fn display_name(&self) -> &str {
        "National Skill Development Corporation"
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    #[instrument(skip(self, issuer), fields(provider = NSDC_PROVIDER, issuer_id = %issuer.id))]
    async fn fetch_credentials(
        &self,
        issuer: &IssuerProfile,
        options: &FetchOptions,
    ) -> ConnectorResult<FetchPage> {
        let registry_id = self.registry_id(issuer)?;
        let mut url = self.partner_url(registry_id, "credentials")?;
        {
            let page_size = match options.page_size {
                0 => DEFAULT_PAGE_SIZE,
                n => n.min(MAX_PAGE_SIZE),
            };
            let mut query = url.query_pairs_mut();
            query.append_pair("page_size", &page_size.to_string());
            if let Some(cursor) = &options.cursor {
                query.append_pair("cursor", cursor);
            }
            if let Some(since) = options.effective_since() {
                query.append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
        }

        let response = self.send_authorized(self.http.get(url)).await?;
        let body: CredentialsResponse = response.json().await?;

        let mut credentials = Vec::with_capacity(body.data.len());
        for item in &body.data {
            match raw_from_item(item) {
                Some(raw) => credentials.push(raw),
                None => warn!(registry_id, "Skipping provider item without a credential id"),
            }
        }

        debug!(
            registry_id,
            count = credentials.len(),
            has_more = body.next_cursor.is_some(),
            "Fetched NSDC credential page"
        );

        Ok(FetchPage {
            credentials,
            has_more: body.next_cursor.is_some(),
            next_cursor: body.next_cursor,
        })
    }

    #[instrument(skip(self, issuer), fields(provider = NSDC_PROVIDER, issuer_id = %issuer.id))]
    async fn subscribe_webhook(
        &self,
        issuer: &IssuerProfile,
        callback_url: &str,
    ) -> ConnectorResult<WebhookSubscription> {
        let registry_id = self.registry_id(issuer)?;
        let url = self.partner_url(registry_id, "webhooks")?;
        let request = self.http.post(url).json(&json!({
            "callback_url": callback_url,
            "events": ["credential.issued"],
        }));

        let response = self.send_authorized(request).await?;
        let body: SubscribeResponse = response.json().await?;
        let status = body.status.as_deref().unwrap_or_default();

        let subscription = WebhookSubscription {
            subscribed: status.eq_ignore_ascii_case("active"),
            requires_approval: status.eq_ignore_ascii_case("pending_approval"),
            webhook_id: body.webhook_id,
            message: body.message,
        };
        info!(
            registry_id,
            subscribed = subscription.subscribed,
            requires_approval = subscription.requires_approval,
            "NSDC webhook subscription requested"
        );
        Ok(subscription)
    }

    #[instrument(skip(self, credential), fields(provider = NSDC_PROVIDER, credential_id = %credential.id))]
    async fn verify(
        &self,
        credential: &RawProviderCredential,
        jwks_url: Option<&str>,
    ) -> VerificationResult {
        match credential.signature_type {
            SignatureType::Jws => {
                let Some(token) = credential.compact_jws() else {
                    return VerificationResult::rejected(
                        VerificationMethod::Jws,
                        "JWS payload is not a compact token",
                    );
                };
                let url = jwks_url
                    .map(String::from)
                    .unwrap_or_else(|| self.config.default_jwks_url());
                let result = verify_compact_jws(&self.jwks, &url, token).await;
                if !result.verified {
                    return result;
                }
                let signed_id = credential_id(credential);
                if signed_id != credential.id {
                    warn!(signed_id = %signed_id, "Signed credential id differs from envelope id");
                    let mut rejected = VerificationResult::rejected(
                        VerificationMethod::Jws,
                        format!("Signed credential id {signed_id} does not match {}", credential.id),
                    );
                    rejected.key_id = result.key_id;
                    return rejected;
                }
                result
            }
            SignatureType::Hmac => VerificationResult::rejected(
                VerificationMethod::Hmac,
                "Use verify_webhook_signature for HMAC",
            ),
            SignatureType::Pdf => meta_result(credential, VerificationMethod::PdfSignatureMeta),
            SignatureType::Dsc => meta_result(credential, VerificationMethod::DscSignatureMeta),
            SignatureType::None => {
                VerificationResult::rejected(VerificationMethod::None, "Credential carries no signature")
            }
        }
    }

    fn normalize(&self, raw: &RawProviderCredential) -> CanonicalCredential {
        normalize_nsdc(raw)
    }

    fn parse_webhook(&self, body: &Value) -> Option<WebhookNotice> {
        let partner_id = first_string(body, &["partner_id", "provider_id"])?;
        let credential = raw_from_item(body)?;
        Some(WebhookNotice {
            partner_id,
            credential,
        })
    }
}

/// Upstream-flag trust path for document signatures.
fn meta_result(credential: &RawProviderCredential, method: VerificationMethod) -> VerificationResult {
    if signature_meta_valid(credential) {
        VerificationResult::verified(method, None)
    } else {
        VerificationResult::rejected(method, "Document signature metadata is not marked valid")
    }
}

/// Canonical form of an NSDC credential.
#[must_use]
pub fn normalize_nsdc(raw: &RawProviderCredential) -> CanonicalCredential {
    let (body, fallback) = credential_sources(raw);

    let mut metadata = Map::new();
    metadata.insert("provider".into(), Value::String(NSDC_PROVIDER.into()));
    for key in ["qp_code", "nos_code", "nsqf_level", "sector"] {
        if let Some(v) = first_string(&body, &[key]).or_else(|| first_string(&fallback, &[key])) {
            metadata.insert(key.into(), Value::String(v));
        }
    }

    CanonicalCredential {
        provider_credential_id: credential_id(raw),
        recipient_email: first_string(&body, &["email", "recipient_email", "holder.email"])
            .map(|e| e.to_lowercase()),
        recipient_phone: first_string(&body, &["phone", "recipient_phone", "holder.phone"]),
        recipient_name: first_string(&body, &["name", "recipient_name", "holder.name"]),
        recipient_dob: first_date(&body, &["dob", "date_of_birth", "holder.dob"]),
        certificate_title: first_string(&body, &["title", "certificate_title", "course_name"])
            .unwrap_or_else(|| "Unknown Certificate".to_string()),
        issue_date: first_datetime(&body, &["issued_at", "issuance_date", "issuanceDate"])
            .unwrap_or_else(Utc::now),
        expiry_date: first_datetime(&body, &["expiry_date", "expirationDate"]),
        skills: string_list(&body, &["skills"]),
        metadata: Value::Object(metadata),
    }
}
