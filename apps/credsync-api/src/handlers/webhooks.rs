//! Provider webhook ingress.
//!
//! The handler only checks the feature flag and the provider, then hands the
//! raw body to the intake channel. Signature checks, issuer lookup and
//! queueing happen on the intake consumer, so a slow store never delays the
//! acknowledgement.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use credsync_sync::WebhookEnvelope;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header names checked for the HMAC signature, in order.
pub const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "x-webhook-signature"];

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn signature_header(headers: &HeaderMap) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// `POST /webhooks/:provider`
pub async fn receive_webhook_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    if !state.is_enabled() {
        return Err(ApiError::SyncDisabled);
    }
    if !state.connectors.contains(&provider) {
        return Err(ApiError::UnknownProvider(provider));
    }

    let signature = signature_header(&headers);
    let bytes = body.len();
    let envelope = WebhookEnvelope::new(provider.as_str(), body.to_vec(), signature);

    // The push is acknowledged either way. Anything lost here is picked up
    // by the next poll or reconciliation sweep.
    match state.intake.submit(envelope).await {
        Ok(()) => debug!(provider = %provider, bytes, "Webhook queued for intake"),
        Err(e) => error!(provider = %provider, bytes, error = %e, "Webhook dropped at intake"),
    }

    Ok(Json(WebhookAck { received: true }))
}
