//! Provider JSON Web Key Sets.
//!
//! Lookup order is memory, then network, then the last snapshot persisted
//! for the URL. A successful network fetch refreshes both the memory entry
//! and the snapshot. A snapshot fallback is held in memory for the TTL too,
//! so an outage costs one failed fetch per URL rather than one per
//! verification. Concurrent refreshes race harmlessly: the last writer wins.

use chrono::Utc;
use credsync_core::{JwksSnapshot, JwksSnapshotStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConnectorError, ConnectorResult};

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Minimum age of a cached set before an unknown `kid` triggers a refetch.
const DEFAULT_MIN_REFRESH_AGE: Duration = Duration::from_secs(30);

pub const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

#[derive(Debug, Clone)]
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct JwksCache {
    entries: Arc<RwLock<HashMap<String, CachedJwks>>>,
    ttl: Duration,
    min_refresh_age: Duration,
    http: reqwest::Client,
    snapshots: Option<Arc<dyn JwksSnapshotStore>>,
}

impl JwksCache {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: DEFAULT_JWKS_TTL,
            min_refresh_age: DEFAULT_MIN_REFRESH_AGE,
            http,
            snapshots: None,
        }
    }

    /// Cache over a client bounded by [`JWKS_FETCH_TIMEOUT`].
    pub fn with_default_client() -> ConnectorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .user_agent(concat!("credsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::invalid_configuration(format!("HTTP client: {e}")))?;
        Ok(Self::new(http))
    }

    /// Persist every fetched set and fall back to it when the network fails.
    #[must_use]
    pub fn with_snapshots(mut self, store: Arc<dyn JwksSnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_min_refresh_age(mut self, age: Duration) -> Self {
        self.min_refresh_age = age;
        self
    }

    #[instrument(skip(self))]
    pub async fn get_keys(&self, jwks_url: &str) -> ConnectorResult<JwkSet> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(jwks_url) {
                if cached.fetched_at.elapsed() < self.ttl {
                    debug!(jwks_url, "JWKS cache hit");
                    return Ok(cached.keys.clone());
                }
            }
        }

        self.refresh(jwks_url).await
    }

    /// Fetch from the network, bypassing memory. Falls back to the snapshot.
    #[instrument(skip(self))]
    pub async fn refresh(&self, jwks_url: &str) -> ConnectorResult<JwkSet> {
        match self.fetch_remote(jwks_url).await {
            Ok(keys) => {
                self.store(jwks_url, &keys).await;
                Ok(keys)
            }
            Err(err) => {
                warn!(jwks_url, error = %err, "JWKS fetch failed, trying persisted snapshot");
                match self.load_snapshot(jwks_url).await {
                    Some(keys) => {
                        self.remember(jwks_url, &keys).await;
                        Ok(keys)
                    }
                    None => Err(ConnectorError::JwksUnavailable {
                        url: jwks_url.to_string(),
                        message: err.to_string(),
                    }),
                }
            }
        }
    }

    /// Key with this `kid`. An unknown `kid` forces one refetch so rotated
    /// keys are picked up before the TTL runs out.
    #[instrument(skip(self))]
    pub async fn find_key(&self, jwks_url: &str, kid: &str) -> ConnectorResult<Option<Jwk>> {
        let keys = self.get_keys(jwks_url).await?;
        if let Some(key) = keys.find(kid) {
            return Ok(Some(key.clone()));
        }

        if !self.refresh_allowed(jwks_url).await {
            return Ok(None);
        }

        info!(jwks_url, kid, "Key id not in cached JWKS, refreshing");
        let keys = self.refresh(jwks_url).await?;
        Ok(keys.find(kid).cloned())
    }

    pub async fn invalidate(&self, jwks_url: &str) {
        self.entries.write().await.remove(jwks_url);
    }

    async fn refresh_allowed(&self, jwks_url: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(jwks_url)
            .map_or(true, |c| c.fetched_at.elapsed() >= self.min_refresh_age)
    }

    async fn fetch_remote(&self, jwks_url: &str) -> ConnectorResult<JwkSet> {
        debug!(jwks_url, "Fetching JWKS");
        let response = self.http.get(jwks_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::from_status(status, body));
        }
        let keys: JwkSet = response.json().await?;
        Ok(keys)
    }

    async fn remember(&self, jwks_url: &str, keys: &JwkSet) {
        self.entries.write().await.insert(
            jwks_url.to_string(),
            CachedJwks {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
    }

    async fn store(&self, jwks_url: &str, keys: &JwkSet) {
        self.remember(jwks_url, keys).await;

        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let jwks = match serde_json::to_value(keys) {
            Ok(v) => v,
            Err(e) => {
                warn!(jwks_url, error = %e, "Could not serialize JWKS snapshot");
                return;
            }
        };
        let snapshot = JwksSnapshot {
            jwks_url: jwks_url.to_string(),
            jwks,
            fetched_at: Utc::now(),
        };
        if let Err(e) = snapshots.save_snapshot(&snapshot).await {
            warn!(jwks_url, error = %e, "Could not persist JWKS snapshot");
        }
    }

    async fn load_snapshot(&self, jwks_url: &str) -> Option<JwkSet> {
        let snapshots = self.snapshots.as_ref()?;
        match snapshots.load_snapshot(jwks_url).await {
            Ok(Some(snapshot)) => match serde_json::from_value::<JwkSet>(snapshot.jwks) {
                Ok(keys) => {
                    info!(
                        jwks_url,
                        fetched_at = %snapshot.fetched_at,
                        "Using persisted JWKS snapshot"
                    );
                    Some(keys)
                }
                Err(e) => {
                    warn!(jwks_url, error = %e, "Persisted JWKS snapshot is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(jwks_url, error = %e, "Could not load JWKS snapshot");
                None
            }
        }
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("ttl", &self.ttl)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}
