//! Pull-based sync.
//!
//! Walks a provider's credential listing for one issuer page by page and
//! enqueues everything not already processed. The issuer's sync state moves
//! to the poll's start time only once the listing has been walked to the end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use credsync_connector::{ConnectorError, ConnectorRegistry, FetchOptions};
use credsync_core::flags::DEFAULT_POLL_PAGE_SIZE;
use credsync_core::{EnqueueOutcome, IdempotencyKey, IssuerId, IssuerProfile, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::enqueue::CredentialEnqueuer;
use crate::stores::SyncStores;

/// Upper bound on pages fetched for one issuer in a single poll.
pub const MAX_PAGES_PER_POLL: u32 = 100;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("External sync disabled")]
    Disabled,

    #[error("Issuer not found: {0}")]
    IssuerNotFound(IssuerId),

    #[error("Issuer {0} does not accept external credentials or has no registry id")]
    NotSyncable(IssuerId),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of polling one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub issuer_id: IssuerId,
    pub provider: String,
    pub full_sync: bool,
    pub pages: u32,
    pub fetched: usize,
    pub enqueued: usize,
    /// Already marked processed.
    pub skipped_processed: usize,
    /// An active job already held the key.
    pub skipped_queued: usize,
    /// Stopped at the page cap with more pages left.
    pub truncated: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuerPollFailure {
    pub issuer_id: IssuerId,
    pub error: String,
}

/// Outcome of a sweep over many issuers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub polled: Vec<PollReport>,
    pub failed: Vec<IssuerPollFailure>,
    /// Issuers that were not eligible for polling.
    pub skipped: usize,
}

impl SweepReport {
    #[must_use]
    pub fn enqueued(&self) -> usize {
        self.polled.iter().map(|r| r.enqueued).sum()
    }

    #[must_use]
    pub fn fetched(&self) -> usize {
        self.polled.iter().map(|r| r.fetched).sum()
    }
}

pub struct Poller {
    connectors: Arc<ConnectorRegistry>,
    stores: SyncStores,
    enqueuer: CredentialEnqueuer,
    enabled: bool,
    page_size: u32,
    max_pages: u32,
}

impl Poller {
    pub fn new(
        connectors: Arc<ConnectorRegistry>,
        stores: SyncStores,
        enqueuer: CredentialEnqueuer,
        enabled: bool,
    ) -> Self {
        Self {
            connectors,
            stores,
            enqueuer,
            enabled,
            page_size: DEFAULT_POLL_PAGE_SIZE,
            max_pages: MAX_PAGES_PER_POLL,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the poller can act on this issuer at all.
    #[must_use]
    pub fn is_pollable(&self, issuer: &IssuerProfile) -> bool {
        issuer.sync_registry_id().is_some() && self.connectors.contains(&issuer.provider)
    }

    pub async fn poll_issuer_by_id(
        &self,
        issuer_id: IssuerId,
        full_sync: bool,
    ) -> Result<PollReport, PollError> {
        let issuer = self
            .stores
            .issuers
            .get_issuer(issuer_id)
            .await?
            .ok_or(PollError::IssuerNotFound(issuer_id))?;
        self.poll_issuer(&issuer, full_sync).await
    }

    #[instrument(skip(self, issuer), fields(issuer_id = %issuer.id, provider = %issuer.provider))]
    pub async fn poll_issuer(
        &self,
        issuer: &IssuerProfile,
        full_sync: bool,
    ) -> Result<PollReport, PollError> {
        if !self.enabled {
            return Err(PollError::Disabled);
        }
        if issuer.sync_registry_id().is_none() {
            return Err(PollError::NotSyncable(issuer.id));
        }
        let connector = self
            .connectors
            .get(&issuer.provider)
            .ok_or_else(|| PollError::UnknownProvider(issuer.provider.clone()))?;
        let provider = connector.provider_id().to_string();

        let started_at = Utc::now();
        let since = if full_sync {
            None
        } else {
            self.stores
                .sync_state
                .get_sync_state(issuer.id)
                .await?
                .and_then(|s| s.last_successful_sync_at)
        };

        let mut report = PollReport {
            issuer_id: issuer.id,
            provider: provider.clone(),
            full_sync,
            pages: 0,
            fetched: 0,
            enqueued: 0,
            skipped_processed: 0,
            skipped_queued: 0,
            truncated: false,
            started_at,
        };
        let mut options = FetchOptions {
            since,
            cursor: None,
            page_size: self.page_size,
            full_sync,
        };

        loop {
            let page = connector.fetch_credentials(issuer, &options).await?;
            report.pages += 1;
            report.fetched += page.credentials.len();

            for raw in page.credentials {
                let key = IdempotencyKey::new(&provider, issuer.id, &raw.id);
                if self.stores.idempotency.is_processed(&key).await? {
                    report.skipped_processed += 1;
                    continue;
                }
                match self.enqueuer.enqueue(&provider, issuer.id, raw).await? {
                    EnqueueOutcome::Enqueued(_) => report.enqueued += 1,
                    EnqueueOutcome::Duplicate => report.skipped_queued += 1,
                }
            }

            let next = page.next_cursor.filter(|_| page.has_more);
            match next {
                Some(cursor) if report.pages < self.max_pages => options.cursor = Some(cursor),
                Some(_) => {
                    report.truncated = true;
                    break;
                }
                None => break,
            }
        }

        if report.truncated {
            warn!(
                pages = report.pages,
                "Page cap reached before the end of the listing, sync state not advanced"
            );
        } else {
            self.stores
                .sync_state
                .record_sync(issuer.id, &provider, started_at)
                .await?;
        }

        info!(
            pages = report.pages,
            fetched = report.fetched,
            enqueued = report.enqueued,
            skipped_processed = report.skipped_processed,
            skipped_queued = report.skipped_queued,
            full_sync,
            "Polled issuer"
        );
        Ok(report)
    }

    /// Incremental poll of every eligible issuer.
    pub async fn poll_all_issuers(&self) -> Result<SweepReport, StoreError> {
        if !self.enabled {
            info!("External sync disabled, skipping poll sweep");
            return Ok(SweepReport::default());
        }
        let issuers = self.stores.issuers.list_external_issuers().await?;
        Ok(self.poll_issuers(&issuers, false).await)
    }

    /// Poll each issuer in turn. One issuer failing never stops the sweep.
    pub async fn poll_issuers(&self, issuers: &[IssuerProfile], full_sync: bool) -> SweepReport {
        let mut sweep = SweepReport::default();
        if !self.enabled {
            return sweep;
        }

        for issuer in issuers {
            if !self.is_pollable(issuer) {
                debug!(issuer_id = %issuer.id, provider = %issuer.provider, "Issuer not pollable, skipping");
                sweep.skipped += 1;
                continue;
            }
            match self.poll_issuer(issuer, full_sync).await {
                Ok(report) => sweep.polled.push(report),
                Err(e) => {
                    error!(issuer_id = %issuer.id, error = %e, "Failed to poll issuer");
                    sweep.failed.push(IssuerPollFailure {
                        issuer_id: issuer.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            polled = sweep.polled.len(),
            failed = sweep.failed.len(),
            skipped = sweep.skipped,
            enqueued = sweep.enqueued(),
            "Poll sweep complete"
        );
        sweep
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("enabled", &self.enabled)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}
