//! OAuth2 client-credentials tokens for provider API calls.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{ConnectorError, ConnectorResult};

/// Tokens are refreshed this long before their stated expiry.
pub const TOKEN_EXPIRY_GRACE: Duration = Duration::seconds(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_usable(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now + grace < self.expires_at
    }
}

/// Caches one provider access token, refreshing lazily.
#[derive(Clone)]
pub struct OAuthTokenCache {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    http: reqwest::Client,
    cached: Arc<RwLock<Option<CachedToken>>>,
    grace: Duration,
}

impl OAuthTokenCache {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            http,
            cached: Arc::new(RwLock::new(None)),
            grace: TOKEN_EXPIRY_GRACE,
        }
    }

    #[instrument(skip(self), fields(token_url = %self.token_url))]
    pub async fn get_token(&self) -> ConnectorResult<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_usable(Utc::now(), self.grace) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Requesting provider access token");
        let token = self.acquire_token().await?;
        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token, e.g. after the provider answered 401.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn acquire_token(&self) -> ConnectorResult<CachedToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match ConnectorError::from_status(status, body) {
                ConnectorError::InvalidResponse { message } => {
                    ConnectorError::AuthenticationFailed { message }
                }
                other => other,
            });
        }

        let body: TokenResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(ConnectorError::invalid_response("token response has empty access_token"));
        }

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in.max(0)),
        })
    }
}

impl std::fmt::Debug for OAuthTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenCache")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache(server: &MockServer) -> OAuthTokenCache {
        OAuthTokenCache::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
            "client-1",
            SecretString::new("secret-1".into()),
        )
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache(&server);
        assert_eq!(cache.get_token().await.unwrap(), "tok-1");
        assert_eq!(cache.get_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_token_inside_grace_window_is_refreshed() {
        let server = MockServer::start().await;
        // Expires in 30s, which is inside the 60s grace window.
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "short-lived",
                "token_type": "Bearer",
                "expires_in": 30
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        cache.get_token().await.unwrap();
        cache.get_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        cache.get_token().await.unwrap();
        cache.invalidate().await;
        cache.get_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_client_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = cache(&server).get_token().await.unwrap_err();
        assert!(matches!(err, ConnectorError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cache = OAuthTokenCache::new(
            reqwest::Client::new(),
            "http://localhost/oauth/token",
            "client-1",
            SecretString::new("very-secret".into()),
        );
        assert!(!format!("{cache:?}").contains("very-secret"));
    }
}
