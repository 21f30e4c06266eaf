//! Process-wide sync toggles.
//!
//! Loaded once at startup by the binary and passed by value into every
//! component that needs it. Nothing here reads the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_RECONCILIATION_INTERVAL_MS: u64 = 3_600_000;
pub const DEFAULT_DLQ_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RECONCILIATION_THRESHOLD_HOURS: i64 = 24;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 5_000;
pub const DEFAULT_POLL_PAGE_SIZE: u32 = 50;

/// Feature flags and tunables for the external credential sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFlags {
    /// Master switch. When off, webhooks answer 503 and the scheduler idles.
    pub enabled: bool,
    /// Minimum confidence for a credential to be marked `verified`.
    pub match_threshold: f64,
    pub poll_interval_ms: u64,
    pub reconciliation_interval_ms: u64,
    /// Subscribe each eligible issuer to provider webhooks at startup.
    pub auto_subscribe_webhooks: bool,
    /// Attempts a queued job gets before it is dead-lettered.
    pub dlq_max_retries: u32,
    pub reconciliation_threshold_hours: i64,
    pub worker_concurrency: usize,
    pub retry_backoff_base_ms: u64,
    pub poll_page_size: u32,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            enabled: false,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconciliation_interval_ms: DEFAULT_RECONCILIATION_INTERVAL_MS,
            auto_subscribe_webhooks: false,
            dlq_max_retries: DEFAULT_DLQ_MAX_RETRIES,
            reconciliation_threshold_hours: DEFAULT_RECONCILIATION_THRESHOLD_HOURS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            poll_page_size: DEFAULT_POLL_PAGE_SIZE,
        }
    }
}

impl SyncFlags {
    /// Flags with sync switched on and every other value at its default.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.reconciliation_interval_ms)
    }

    #[must_use]
    pub fn reconciliation_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reconciliation_threshold_hours)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    #[must_use]
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        exponential_backoff(self.retry_backoff_base_ms, attempt)
    }
}

/// `base_ms * 2^(attempt-1)`, with the exponent capped at 16.
#[must_use]
pub fn exponential_backoff(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp))
}
