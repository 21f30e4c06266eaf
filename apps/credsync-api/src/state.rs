//! Application state shared across all request handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use credsync_connector::ConnectorRegistry;
use credsync_core::SyncFlags;
use credsync_sync::{DlqService, IntakeSender, Poller, SyncScheduler, SyncStores};

/// Shared handles for every handler.
///
/// Cloned per request. Every field is a handle, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub flags: Arc<SyncFlags>,
    pub stores: SyncStores,
    pub connectors: Arc<ConnectorRegistry>,
    /// Producer half of the webhook intake channel.
    pub intake: IntakeSender,
    pub dlq: DlqService,
    pub poller: Arc<Poller>,
    pub scheduler: Arc<SyncScheduler>,
    /// Base for `{base}/webhooks/{provider}` subscription callbacks.
    pub callback_base_url: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags.enabled
    }

    /// Default callback URL for a provider, if a public base is configured.
    #[must_use]
    pub fn callback_url(&self, provider: &str) -> Option<String> {
        self.callback_base_url
            .as_ref()
            .map(|base| format!("{base}/webhooks/{provider}"))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("flags", &self.flags)
            .field("connectors", &self.connectors)
            .field("callback_base_url", &self.callback_base_url)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
