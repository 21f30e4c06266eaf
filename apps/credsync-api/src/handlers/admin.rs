//! Operator endpoints under `/admin`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use credsync_core::{
    CredentialFilter, CredentialStatus, CredentialStore, DeadLetterStore, DlqEntry, DlqEntryId,
    ExternalCredentialRecord, IssuerDirectory, IssuerId, IssuerProfile, JobQueue, SyncStateStore,
};
use credsync_sync::{
    BulkRetryResponse, DlqEntryList, PollReport, RetryResponse, SchedulerStatus, SweepSummary,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::subscribe::{subscribe_issuer, IssuerSubscription};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;
const MAX_BULK_RETRY: usize = 100;

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialQuery {
    pub status: Option<CredentialStatus>,
    pub issuer_id: Option<IssuerId>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u64,
}

/// Paginated external credentials.
#[derive(Debug, Serialize)]
pub struct CredentialList {
    pub items: Vec<ExternalCredentialRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

async fn list_credentials(state: &AppState, mut filter: CredentialFilter) -> ApiResult<CredentialList> {
    filter.limit = filter.limit.clamp(1, MAX_LIMIT);
    let page = state.stores.credentials.list_credentials(&filter).await?;
    Ok(CredentialList {
        items: page.items,
        total: page.total,
        limit: filter.limit,
        offset: filter.offset,
    })
}

// ---------------------------------------------------------------------------
// Issuers
// ---------------------------------------------------------------------------

/// An issuer with its sync bookkeeping.
#[derive(Debug, Serialize)]
pub struct IssuerSyncView {
    #[serde(flatten)]
    pub issuer: IssuerProfile,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    /// Has a registry id and a registered connector.
    pub pollable: bool,
}

/// `GET /admin/issuers`
pub async fn list_issuers_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<IssuerSyncView>>> {
    let issuers = state.stores.issuers.list_external_issuers().await?;
    let synced: HashMap<IssuerId, Option<DateTime<Utc>>> = state
        .stores
        .sync_state
        .list_sync_states()
        .await?
        .into_iter()
        .map(|s| (s.issuer_id, s.last_successful_sync_at))
        .collect();

    let views = issuers
        .into_iter()
        .filter(|issuer| issuer.accept_external)
        .map(|issuer| IssuerSyncView {
            last_successful_sync_at: synced.get(&issuer.id).copied().flatten(),
            pollable: state.poller.is_pollable(&issuer),
            issuer,
        })
        .collect();
    Ok(Json(views))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub full_sync: bool,
}

/// `POST /admin/issuers/:id/sync`
pub async fn sync_issuer_handler(
    State(state): State<AppState>,
    Path(id): Path<IssuerId>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<PollReport>> {
    let report = state.poller.poll_issuer_by_id(id, request.full_sync).await?;
    Ok(Json(report))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeRequest {
    pub callback_url: Option<String>,
}

/// `POST /admin/issuers/:id/subscribe`
pub async fn subscribe_issuer_handler(
    State(state): State<AppState>,
    Path(id): Path<IssuerId>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<Json<IssuerSubscription>> {
    if !state.is_enabled() {
        return Err(ApiError::SyncDisabled);
    }
    let issuer = state
        .stores
        .issuers
        .get_issuer(id)
        .await?
        .ok_or(ApiError::IssuerNotFound(id))?;

    let result = subscribe_issuer(&state, &issuer, request.callback_url).await?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Stats and credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_external: u64,
    pub verified: u64,
    pub pending: u64,
    pub rejected: u64,
    pub dlq_count: u64,
    pub queue_pending: u64,
    pub queue_processing: u64,
    pub feature_enabled: bool,
    pub match_threshold: f64,
}

/// `GET /admin/stats`
pub async fn stats_handler(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let counts = state.stores.credentials.count_by_status().await?;
    let dlq_count = state.stores.dlq.count_entries().await?;
    let depth = state.stores.queue.depth().await?;

    Ok(Json(StatsResponse {
        total_external: counts.total,
        verified: counts.verified,
        pending: counts.pending,
        rejected: counts.rejected,
        dlq_count,
        queue_pending: depth.pending,
        queue_processing: depth.processing,
        feature_enabled: state.is_enabled(),
        match_threshold: state.flags.match_threshold,
    }))
}

/// `GET /admin/external-credentials`
pub async fn list_credentials_handler(
    State(state): State<AppState>,
    Query(query): Query<CredentialQuery>,
) -> ApiResult<Json<CredentialList>> {
    let filter = CredentialFilter {
        status: query.status,
        issuer_id: query.issuer_id,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(list_credentials(&state, filter).await?))
}

/// `GET /admin/pending-matches`
///
/// Credentials below the match threshold, awaiting manual linking.
pub async fn pending_matches_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CredentialList>> {
    let filter = CredentialFilter {
        status: Some(CredentialStatus::Pending),
        issuer_id: None,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(list_credentials(&state, filter).await?))
}

// ---------------------------------------------------------------------------
// Dead letter queue
// ---------------------------------------------------------------------------

/// `GET /admin/dlq`
pub async fn list_dlq_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<DlqEntryList>> {
    Ok(Json(state.dlq.list(query.limit, query.offset).await?))
}

/// `GET /admin/dlq/:id`
pub async fn get_dlq_entry_handler(
    State(state): State<AppState>,
    Path(id): Path<DlqEntryId>,
) -> ApiResult<Json<DlqEntry>> {
    Ok(Json(state.dlq.get(id).await?))
}

/// `POST /admin/dlq/:id/retry`
pub async fn retry_dlq_entry_handler(
    State(state): State<AppState>,
    Path(id): Path<DlqEntryId>,
) -> ApiResult<Json<RetryResponse>> {
    Ok(Json(state.dlq.retry(id).await?))
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRetryRequest {
    pub ids: Vec<DlqEntryId>,
}

/// `POST /admin/dlq/retry`
pub async fn bulk_retry_dlq_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkRetryRequest>,
) -> ApiResult<Json<BulkRetryResponse>> {
    if request.ids.is_empty() {
        return Err(ApiError::Validation("ids must not be empty".to_string()));
    }
    if request.ids.len() > MAX_BULK_RETRY {
        return Err(ApiError::Validation(format!(
            "at most {MAX_BULK_RETRY} entries can be retried at once"
        )));
    }
    Ok(Json(state.dlq.retry_bulk(&request.ids).await))
}

/// `DELETE /admin/dlq/:id`
pub async fn delete_dlq_entry_handler(
    State(state): State<AppState>,
    Path(id): Path<DlqEntryId>,
) -> ApiResult<StatusCode> {
    state.dlq.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// `GET /admin/scheduler`
pub async fn scheduler_status_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// `false` when a sweep of the same kind was already running.
    pub ran: bool,
    pub summary: Option<SweepSummary>,
}

/// `POST /admin/scheduler/poll`
pub async fn trigger_poll_handler(State(state): State<AppState>) -> ApiResult<Json<TriggerResponse>> {
    if !state.is_enabled() {
        return Err(ApiError::SyncDisabled);
    }
    let report = state.scheduler.trigger_poll().await?;
    info!(ran = report.is_some(), "Manual poll sweep requested");
    Ok(Json(TriggerResponse {
        ran: report.is_some(),
        summary: report.as_ref().map(SweepSummary::from),
    }))
}

/// `POST /admin/scheduler/reconcile`
pub async fn trigger_reconciliation_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<TriggerResponse>> {
    if !state.is_enabled() {
        return Err(ApiError::SyncDisabled);
    }
    let report = state.scheduler.trigger_reconciliation().await?;
    info!(ran = report.is_some(), "Manual reconciliation requested");
    Ok(Json(TriggerResponse {
        ran: report.is_some(),
        summary: report.as_ref().map(SweepSummary::from),
    }))
}
