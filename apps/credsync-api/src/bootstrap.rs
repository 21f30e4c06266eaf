//! Wiring of the sync pipeline and its background tasks.
//!
//! [`build_pipeline`] assembles every component from injected stores,
//! connectors and KMS. [`Pipeline::spawn`] starts the worker pool, the
//! webhook intake consumer and the scheduler on a shared shutdown token and
//! hands back the request state plus the task handles to join on exit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use credsync_connector::ConnectorRegistry;
use credsync_core::SyncFlags;
use credsync_kms::Kms;
use credsync_sync::{
    intake_channel, CredentialEnqueuer, CredentialProcessor, CredentialWorker, DlqService, Poller,
    Reconciler, SchedulerConfig, SyncScheduler, SyncStores, WebhookEnvelope, WebhookIntake,
    WorkerConfig, DEFAULT_INTAKE_CAPACITY,
};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::state::AppState;

/// Everything [`build_pipeline`] needs besides the injected backends.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub flags: SyncFlags,
    pub webhook_secrets: Vec<(String, SecretString)>,
    pub ack_timeout: Duration,
    pub intake_capacity: usize,
    pub callback_base_url: Option<String>,
}

impl PipelineSettings {
    #[must_use]
    pub fn new(flags: SyncFlags) -> Self {
        Self {
            flags,
            webhook_secrets: Vec::new(),
            ack_timeout: credsync_sync::intake::DEFAULT_ACK_TIMEOUT,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            callback_base_url: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            flags: config.flags.clone(),
            webhook_secrets: config.webhook_secrets(),
            ack_timeout: config.webhook_ack_timeout,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            callback_base_url: config.webhook_callback_base_url.clone(),
        }
    }
}

/// Assembled pipeline whose tasks have not started yet.
pub struct Pipeline {
    state: AppState,
    worker: CredentialWorker,
    intake: WebhookIntake,
    intake_rx: mpsc::Receiver<WebhookEnvelope>,
}

/// Build every component. `shutdown` is the token the worker watches.
pub fn build_pipeline(
    settings: PipelineSettings,
    stores: SyncStores,
    connectors: Arc<ConnectorRegistry>,
    kms: Arc<dyn Kms>,
    shutdown: &CancellationToken,
) -> Pipeline {
    let flags = settings.flags;
    let enqueuer = CredentialEnqueuer::new(stores.queue.clone(), flags.dlq_max_retries);

    let processor = Arc::new(CredentialProcessor::new(
        connectors.clone(),
        stores.clone(),
        kms,
        flags.match_threshold,
    ));
    let worker = CredentialWorker::new(
        processor,
        stores.queue.clone(),
        stores.dlq.clone(),
        WorkerConfig::from_flags(&flags),
        shutdown.clone(),
    );

    let poller = Arc::new(
        Poller::new(connectors.clone(), stores.clone(), enqueuer.clone(), flags.enabled)
            .with_page_size(flags.poll_page_size),
    );
    let reconciler = Arc::new(Reconciler::new(
        poller.clone(),
        stores.clone(),
        flags.reconciliation_threshold(),
    ));
    let scheduler = Arc::new(SyncScheduler::new(
        poller.clone(),
        reconciler,
        SchedulerConfig::from_flags(&flags),
    ));

    let intake = settings.webhook_secrets.into_iter().fold(
        WebhookIntake::new(connectors.clone(), stores.issuers.clone(), enqueuer.clone()),
        |intake, (provider, secret)| intake.with_secret(provider, secret),
    );
    let (sender, intake_rx) = intake_channel(settings.intake_capacity, settings.ack_timeout);

    let state = AppState {
        flags: Arc::new(flags),
        dlq: DlqService::new(stores.dlq.clone(), enqueuer),
        stores,
        connectors,
        intake: sender,
        poller,
        scheduler,
        callback_base_url: settings.callback_base_url,
        started_at: Utc::now(),
    };

    Pipeline {
        state,
        worker,
        intake,
        intake_rx,
    }
}

impl Pipeline {
    /// Request state, usable before [`spawn`](Self::spawn).
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the background tasks on `shutdown`.
    pub fn spawn(self, shutdown: &CancellationToken) -> (AppState, BackgroundTasks) {
        let Pipeline {
            state,
            worker,
            intake,
            intake_rx,
        } = self;

        let mut tasks = BackgroundTasks::default();

        tasks.push("worker", tokio::spawn(async move { worker.run().await }));

        let token = shutdown.clone();
        tasks.push(
            "webhook_intake",
            tokio::spawn(async move { intake.run(intake_rx, token).await }),
        );

        let scheduler = state.scheduler.clone();
        let token = shutdown.clone();
        tasks.push(
            "scheduler",
            tokio::spawn(async move { scheduler.run(token).await }),
        );

        info!(tasks = tasks.len(), "Background tasks started");
        (state, tasks)
    }
}

/// Handles of the supervised background tasks.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task. Call after the shutdown token has fired.
    pub async fn join(self) {
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => info!(task = name, "Background task stopped"),
                Err(e) => error!(task = name, error = %e, "Background task failed"),
            }
        }
    }
}
