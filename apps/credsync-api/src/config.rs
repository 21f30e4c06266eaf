//! Configuration management for the credential sync service.
//!
//! Configuration is loaded from environment variables, with optional
//! `.env` file support via `dotenvy`.

use std::env;
use std::time::Duration;

use credsync_connector::{DIGILOCKER_PROVIDER, NSDC_PROVIDER};
use credsync_core::flags::{
    DEFAULT_DLQ_MAX_RETRIES, DEFAULT_MATCH_THRESHOLD, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_POLL_PAGE_SIZE, DEFAULT_RECONCILIATION_INTERVAL_MS,
    DEFAULT_RECONCILIATION_THRESHOLD_HOURS, DEFAULT_RETRY_BACKOFF_BASE_MS,
    DEFAULT_WORKER_CONCURRENCY,
};
use credsync_core::SyncFlags;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: &str = "8080";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_APISETU_BASE_URL: &str = "http://localhost:4000";
const DEFAULT_ACK_TIMEOUT_MS: u64 = 2000;

/// Fixed 32-byte development key used when `KMS_DEV_KEY` is unset.
const DEFAULT_DEV_KEY: &str = "credsync-local-development-key!!";
const KEY_LEN: usize = 32;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Where the at-rest encryption key comes from.
#[derive(Debug, Clone)]
pub enum KmsConfig {
    /// Local AES key given as a raw 32-character string.
    Local { dev_key: SecretString },
    /// Production master key, standard base64 of 32 bytes.
    Master { key: SecretString },
}

/// Credentials for the API Setu (NSDC) registry.
#[derive(Debug, Clone)]
pub struct ApiSetuConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Server bind address
    pub host: String,

    /// Server listen port
    pub port: u16,

    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Sync toggles and tunables
    pub flags: SyncFlags,

    pub kms: KmsConfig,

    pub apisetu: ApiSetuConfig,

    pub nsdc_webhook_secret: Option<SecretString>,

    pub digilocker_webhook_secret: Option<SecretString>,

    /// Public base URL providers call back on, e.g. `https://sync.example.org`
    pub webhook_callback_base_url: Option<String>,

    /// Longest a webhook request waits for intake capacity
    pub webhook_ack_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let host = get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port: u16 = get("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string()).parse()?;
        if port == 0 {
            return Err(ConfigError::invalid("PORT", "must be non-zero"));
        }

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let match_threshold: f64 = parse_or(&get, "MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD)?;
        if !(0.0..=1.0).contains(&match_threshold) {
            return Err(ConfigError::invalid(
                "MATCH_THRESHOLD",
                "must be between 0 and 1",
            ));
        }

        let flags = SyncFlags {
            enabled: parse_bool(&get, "EXTERNAL_SYNC_ENABLED", false),
            match_threshold,
            poll_interval_ms: parse_or(&get, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            reconciliation_interval_ms: parse_or(
                &get,
                "RECONCILIATION_INTERVAL_MS",
                DEFAULT_RECONCILIATION_INTERVAL_MS,
            )?,
            auto_subscribe_webhooks: parse_bool(&get, "AUTO_SUBSCRIBE_WEBHOOKS", false),
            dlq_max_retries: parse_or(&get, "DLQ_MAX_RETRIES", DEFAULT_DLQ_MAX_RETRIES)?,
            reconciliation_threshold_hours: parse_or(
                &get,
                "RECONCILIATION_THRESHOLD_HOURS",
                DEFAULT_RECONCILIATION_THRESHOLD_HOURS,
            )?,
            worker_concurrency: parse_or(&get, "WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            retry_backoff_base_ms: parse_or(
                &get,
                "RETRY_BACKOFF_BASE_MS",
                DEFAULT_RETRY_BACKOFF_BASE_MS,
            )?,
            poll_page_size: parse_or(&get, "POLL_PAGE_SIZE", DEFAULT_POLL_PAGE_SIZE)?,
        };
        if flags.dlq_max_retries == 0 {
            return Err(ConfigError::invalid("DLQ_MAX_RETRIES", "must be at least 1"));
        }

        let kms = if parse_bool(&get, "KMS_MOCK", true) {
            let dev_key = get("KMS_DEV_KEY").unwrap_or_else(|| DEFAULT_DEV_KEY.to_string());
            if dev_key.len() != KEY_LEN {
                return Err(ConfigError::invalid(
                    "KMS_DEV_KEY",
                    format!("must be exactly {KEY_LEN} bytes"),
                ));
            }
            KmsConfig::Local {
                dev_key: SecretString::new(dev_key),
            }
        } else {
            let key = get("KMS_MASTER_KEY")
                .ok_or_else(|| ConfigError::MissingVar("KMS_MASTER_KEY".to_string()))?;
            KmsConfig::Master {
                key: SecretString::new(key),
            }
        };

        let apisetu = ApiSetuConfig {
            base_url: get("APISETU_BASE_URL").unwrap_or_else(|| DEFAULT_APISETU_BASE_URL.to_string()),
            client_id: get("APISETU_CLIENT_ID").unwrap_or_default(),
            client_secret: SecretString::new(get("APISETU_CLIENT_SECRET").unwrap_or_default()),
        };

        let webhook_callback_base_url = get("WEBHOOK_CALLBACK_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string());

        let ack_timeout_ms: u64 = parse_or(&get, "WEBHOOK_ACK_TIMEOUT_MS", DEFAULT_ACK_TIMEOUT_MS)?;
        if ack_timeout_ms == 0 {
            return Err(ConfigError::invalid("WEBHOOK_ACK_TIMEOUT_MS", "must be non-zero"));
        }

        Ok(Self {
            database_url,
            host,
            port,
            log_level,
            flags,
            kms,
            apisetu,
            nsdc_webhook_secret: get("NSDC_WEBHOOK_SECRET").map(SecretString::new),
            digilocker_webhook_secret: get("DIGILOCKER_WEBHOOK_SECRET").map(SecretString::new),
            webhook_callback_base_url,
            webhook_ack_timeout: Duration::from_millis(ack_timeout_ms),
        })
    }

    /// Get the server bind address as a string.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured HMAC secrets keyed by provider id.
    #[must_use]
    pub fn webhook_secrets(&self) -> Vec<(String, SecretString)> {
        [
            (NSDC_PROVIDER, &self.nsdc_webhook_secret),
            (DIGILOCKER_PROVIDER, &self.digilocker_webhook_secret),
        ]
        .into_iter()
        .filter_map(|(provider, secret)| {
            secret
                .as_ref()
                .filter(|s| !s.expose_secret().is_empty())
                .map(|s| (provider.to_string(), s.clone()))
        })
        .collect()
    }
}

fn parse_or<G, T>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, var: &str, default: bool) -> bool
where
    G: Fn(&str) -> Option<String>,
{
    get(var).map_or(default, |s| {
        matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes")
    })
}
