//! Sync Scheduler
//!
//! Drives the periodic poll sweep and reconciliation on their own intervals.
//! Each sweep kind runs at most once at a time; a tick or manual trigger that
//! lands while one is in flight is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use credsync_core::{StoreResult, SyncFlags};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::poller::{Poller, SweepReport};
use crate::reconciliation::Reconciler;

/// Delay before the first poll after startup.
pub const INITIAL_POLL_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub reconciliation_interval: Duration,
    pub initial_delay: Duration,
}

impl SchedulerConfig {
    #[must_use]
    pub fn from_flags(flags: &SyncFlags) -> Self {
        Self {
            enabled: flags.enabled,
            poll_interval: flags.poll_interval().max(Duration::from_millis(1)),
            reconciliation_interval: flags.reconciliation_interval().max(Duration::from_millis(1)),
            initial_delay: INITIAL_POLL_DELAY,
        }
    }
}

/// Summary of a finished sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub issuers_polled: usize,
    pub issuers_failed: usize,
    pub issuers_skipped: usize,
    pub fetched: usize,
    pub enqueued: usize,
}

impl From<&SweepReport> for SweepSummary {
    fn from(report: &SweepReport) -> Self {
        Self {
            issuers_polled: report.polled.len(),
            issuers_failed: report.failed.len(),
            issuers_skipped: report.skipped,
            fetched: report.fetched(),
            enqueued: report.enqueued(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub enabled: bool,
    pub is_polling: bool,
    pub is_reconciling: bool,
    pub poll_interval_ms: u64,
    pub reconciliation_interval_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub last_reconciliation_at: Option<DateTime<Utc>>,
    pub next_reconciliation_at: Option<DateTime<Utc>>,
    pub last_poll: Option<SweepSummary>,
    pub last_reconciliation: Option<SweepSummary>,
}

/// Clears a busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncScheduler {
    poller: Arc<Poller>,
    reconciler: Arc<Reconciler>,
    config: SchedulerConfig,
    polling: AtomicBool,
    reconciling: AtomicBool,
    status: RwLock<SchedulerStatus>,
}

impl SyncScheduler {
    pub fn new(poller: Arc<Poller>, reconciler: Arc<Reconciler>, config: SchedulerConfig) -> Self {
        let status = SchedulerStatus {
            enabled: config.enabled,
            poll_interval_ms: duration_ms(config.poll_interval),
            reconciliation_interval_ms: duration_ms(config.reconciliation_interval),
            ..SchedulerStatus::default()
        };
        Self {
            poller,
            reconciler,
            config,
            polling: AtomicBool::new(false),
            reconciling: AtomicBool::new(false),
            status: RwLock::new(status),
        }
    }

    /// Tick both sweeps until `shutdown` fires. Idles when sync is disabled.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("External sync disabled, scheduler idle");
            shutdown.cancelled().await;
            return;
        }

        let start = Instant::now();
        let mut poll_tick = interval_at(start + self.config.initial_delay, self.config.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile_tick = interval_at(
            start + self.config.reconciliation_interval,
            self.config.reconciliation_interval,
        );
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        {
            let now = Utc::now();
            let mut status = self.status.write().await;
            status.running = true;
            status.started_at = Some(now);
            status.next_poll_at = Some(now + to_chrono(self.config.initial_delay));
            status.next_reconciliation_at = Some(now + to_chrono(self.config.reconciliation_interval));
        }
        info!(
            poll_interval_ms = duration_ms(self.config.poll_interval),
            reconciliation_interval_ms = duration_ms(self.config.reconciliation_interval),
            "Sync scheduler started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = poll_tick.tick() => {
                    if let Err(e) = self.trigger_poll().await {
                        error!(error = %e, "Scheduled poll sweep failed");
                    }
                }
                _ = reconcile_tick.tick() => {
                    if let Err(e) = self.trigger_reconciliation().await {
                        error!(error = %e, "Scheduled reconciliation failed");
                    }
                }
            }
        }

        let mut status = self.status.write().await;
        status.running = false;
        status.next_poll_at = None;
        status.next_reconciliation_at = None;
        info!("Sync scheduler stopped");
    }

    /// Run a poll sweep now. `None` if one is already in progress.
    pub async fn trigger_poll(&self) -> StoreResult<Option<SweepReport>> {
        let Some(_busy) = BusyGuard::acquire(&self.polling) else {
            warn!("Poll sweep already running, skipping");
            return Ok(None);
        };
        self.status.write().await.is_polling = true;

        let result = self.poller.poll_all_issuers().await;

        let now = Utc::now();
        let mut status = self.status.write().await;
        status.is_polling = false;
        if let Ok(report) = &result {
            status.last_poll_at = Some(now);
            status.last_poll = Some(SweepSummary::from(report));
        }
        if status.running {
            status.next_poll_at = Some(now + to_chrono(self.config.poll_interval));
        }
        result.map(Some)
    }

    /// Run reconciliation now. `None` if it is already in progress.
    pub async fn trigger_reconciliation(&self) -> StoreResult<Option<SweepReport>> {
        let Some(_busy) = BusyGuard::acquire(&self.reconciling) else {
            warn!("Reconciliation already running, skipping");
            return Ok(None);
        };
        self.status.write().await.is_reconciling = true;

        let result = self.reconciler.run().await;

        let now = Utc::now();
        let mut status = self.status.write().await;
        status.is_reconciling = false;
        if let Ok(report) = &result {
            status.last_reconciliation_at = Some(now);
            status.last_reconciliation = Some(SweepSummary::from(report));
        }
        if status.running {
            status.next_reconciliation_at =
                Some(now + to_chrono(self.config.reconciliation_interval));
        }
        result.map(Some)
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.config)
            .field("polling", &self.polling.load(Ordering::Relaxed))
            .field("reconciling", &self.reconciling.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}
