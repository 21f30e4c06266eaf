//! Liveness endpoints.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub feature_enabled: bool,
    pub timestamp: DateTime<Utc>,
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (now - state.started_at).num_seconds().max(0),
        feature_enabled: state.is_enabled(),
        timestamp: now,
    })
}

#[derive(Debug, Serialize)]
pub struct WebhookHealthResponse {
    pub status: &'static str,
    pub feature_enabled: bool,
    pub providers: Vec<String>,
}

/// `GET /webhooks/health`
pub async fn webhook_health_handler(State(state): State<AppState>) -> Json<WebhookHealthResponse> {
    let mut providers: Vec<String> = state.connectors.providers().map(str::to_string).collect();
    providers.sort();
    Json(WebhookHealthResponse {
        status: "ok",
        feature_enabled: state.is_enabled(),
        providers,
    })
}
