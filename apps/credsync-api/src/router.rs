//! Axum router for the service.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, webhooks};
use crate::state::AppState;

/// Routes under `/admin`.
fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/issuers", get(admin::list_issuers_handler))
        .route("/issuers/:id/sync", post(admin::sync_issuer_handler))
        .route("/issuers/:id/subscribe", post(admin::subscribe_issuer_handler))
        .route("/stats", get(admin::stats_handler))
        .route("/external-credentials", get(admin::list_credentials_handler))
        .route("/pending-matches", get(admin::pending_matches_handler))
        // Dead letter queue
        .route("/dlq", get(admin::list_dlq_handler))
        .route("/dlq/retry", post(admin::bulk_retry_dlq_handler))
        .route(
            "/dlq/:id",
            get(admin::get_dlq_entry_handler).delete(admin::delete_dlq_entry_handler),
        )
        .route("/dlq/:id/retry", post(admin::retry_dlq_entry_handler))
        // Scheduler
        .route("/scheduler", get(admin::scheduler_status_handler))
        .route("/scheduler/poll", post(admin::trigger_poll_handler))
        .route("/scheduler/reconcile", post(admin::trigger_reconciliation_handler))
}

/// Build the full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/webhooks/health", get(health::webhook_health_handler))
        .route("/webhooks/:provider", post(webhooks::receive_webhook_handler))
        .nest("/admin", admin_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
