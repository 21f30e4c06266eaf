//! Provider webhook subscriptions for issuers.

use credsync_connector::WebhookSubscription;
use credsync_core::{IssuerDirectory, IssuerId, IssuerProfile};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Result of subscribing one issuer.
#[derive(Debug, Clone, Serialize)]
pub struct IssuerSubscription {
    pub issuer_id: IssuerId,
    pub provider: String,
    pub callback_url: String,
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
}

/// Totals for a startup subscription pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscribeSummary {
    pub subscribed: usize,
    pub pending_approval: usize,
    pub unsupported: usize,
    pub failed: usize,
}

/// Subscribe one issuer, defaulting the callback to the configured base URL.
pub async fn subscribe_issuer(
    state: &AppState,
    issuer: &IssuerProfile,
    callback_url: Option<String>,
) -> ApiResult<IssuerSubscription> {
    if !state.poller.is_pollable(issuer) {
        return Err(ApiError::NotSyncable(issuer.id));
    }
    let connector = state
        .connectors
        .get(&issuer.provider)
        .ok_or_else(|| ApiError::UnknownProvider(issuer.provider.clone()))?;

    let callback_url = callback_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| state.callback_url(connector.provider_id()))
        .ok_or_else(|| {
            ApiError::Validation(
                "callback_url is required when WEBHOOK_CALLBACK_BASE_URL is not set".to_string(),
            )
        })?;

    let subscription = connector.subscribe_webhook(issuer, &callback_url).await?;
    info!(
        issuer_id = %issuer.id,
        provider = %issuer.provider,
        subscribed = subscription.subscribed,
        requires_approval = subscription.requires_approval,
        "Webhook subscription requested"
    );

    Ok(IssuerSubscription {
        issuer_id: issuer.id,
        provider: issuer.provider.clone(),
        callback_url,
        subscription,
    })
}

/// Subscribe every pollable issuer whose provider supports webhooks.
///
/// Failures are logged and counted; nothing here stops startup.
pub async fn auto_subscribe(state: &AppState) -> SubscribeSummary {
    let mut summary = SubscribeSummary::default();

    if state.callback_base_url.is_none() {
        warn!("AUTO_SUBSCRIBE_WEBHOOKS is set but WEBHOOK_CALLBACK_BASE_URL is not; skipping");
        return summary;
    }

    let issuers = match state.stores.issuers.list_external_issuers().await {
        Ok(issuers) => issuers,
        Err(e) => {
            warn!(error = %e, "Could not list issuers for webhook subscription");
            return summary;
        }
    };

    for issuer in issuers.iter().filter(|i| state.poller.is_pollable(i)) {
        let supports = state
            .connectors
            .get(&issuer.provider)
            .is_some_and(|c| c.supports_webhooks());
        if !supports {
            summary.unsupported += 1;
            continue;
        }

        match subscribe_issuer(state, issuer, None).await {
            Ok(result) if result.subscription.subscribed => summary.subscribed += 1,
            Ok(result) if result.subscription.requires_approval => summary.pending_approval += 1,
            Ok(_) => summary.unsupported += 1,
            Err(e) => {
                warn!(issuer_id = %issuer.id, error = %e, "Webhook subscription failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        subscribed = summary.subscribed,
        pending_approval = summary.pending_approval,
        unsupported = summary.unsupported,
        failed = summary.failed,
        "Webhook auto-subscription finished"
    );
    summary
}
