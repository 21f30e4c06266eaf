//! Router tests over the in-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use credsync_api::{app_router, build_pipeline, Pipeline, PipelineSettings};
use credsync_connector::{
    ConnectorRegistry, DigiLockerConnector, JwksCache, NsdcConfig, NsdcConnector,
    DIGILOCKER_PROVIDER, NSDC_PROVIDER,
};
use credsync_core::{IssuerId, IssuerProfile, SyncFlags, SyncStateStore};
use credsync_db::InMemoryStore;
use credsync_kms::LocalKms;
use credsync_sync::SyncStores;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const DEV_KEY: &str = "0123456789abcdef0123456789abcdef";

struct TestApp {
    store: Arc<InMemoryStore>,
    pipeline: Pipeline,
    shutdown: CancellationToken,
}

impl TestApp {
    fn new(settings: PipelineSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let nsdc = NsdcConnector::new(
            NsdcConfig::new("http://127.0.0.1:9", "client", SecretString::new("secret".into())),
            JwksCache::new(reqwest::Client::new()),
        )
        .unwrap();
        let connectors = Arc::new(
            ConnectorRegistry::new()
                .with(Arc::new(nsdc))
                .with(Arc::new(DigiLockerConnector::new())),
        );
        let kms = Arc::new(LocalKms::dev(DEV_KEY).unwrap());
        let shutdown = CancellationToken::new();
        let pipeline = build_pipeline(
            settings,
            SyncStores::from_backend(store.clone()),
            connectors,
            kms,
            &shutdown,
        );
        Self {
            store,
            pipeline,
            shutdown,
        }
    }

    fn enabled() -> Self {
        Self::new(PipelineSettings::new(SyncFlags::enabled()))
    }

    fn disabled() -> Self {
        Self::new(PipelineSettings::new(SyncFlags::default()))
    }

    fn router(&self) -> Router {
        app_router(self.pipeline.state().clone())
    }

    async fn add_issuer(&self, provider: &str, registry_id: &str) -> IssuerProfile {
        let issuer = IssuerProfile {
            id: IssuerId::new(),
            name: format!("Issuer {registry_id}"),
            provider: provider.to_string(),
            registry_id: Some(registry_id.to_string()),
            accept_external: true,
            jwks_url: None,
        };
        self.store.add_issuer(issuer.clone()).await;
        issuer
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::enabled();

    let (status, body) = send(app.router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["feature_enabled"], true);

    let (status, body) = send(app.router(), get("/webhooks/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["providers"], json!([DIGILOCKER_PROVIDER, NSDC_PROVIDER]));
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_webhook_when_disabled_returns_503() {
    let app = TestApp::disabled();
    let (status, body) = send(
        app.router(),
        post_json("/webhooks/nsdc", &json!({"partner_id": "P1", "credential_id": "C1"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "External sync disabled");
    assert_eq!(body["status"], 503);
}

#[tokio::test]
async fn test_webhook_unknown_provider_returns_404() {
    let app = TestApp::enabled();
    let (status, body) = send(app.router(), post_json("/webhooks/acme", &json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_provider");
}

#[tokio::test]
async fn test_webhook_is_acknowledged_before_processing() {
    let app = TestApp::enabled();
    app.add_issuer(NSDC_PROVIDER, "P1").await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/nsdc")
        .header("x-signature", "deadbeef")
        .body(Body::from(r#"{"partner_id":"P1","credential_id":"C1"}"#))
        .unwrap();
    let (status, body) = send(app.router(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"received": true}));
    // No consumer is running, so nothing reached the queue.
    assert!(app.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_malformed_webhook_body_is_still_acknowledged() {
    let app = TestApp::enabled();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/nsdc")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app.router(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_webhook_ack_stays_within_budget_when_intake_is_full() {
    let mut settings = PipelineSettings::new(SyncFlags::enabled());
    settings.intake_capacity = 1;
    settings.ack_timeout = Duration::from_millis(100);
    let app = TestApp::new(settings);
    let body = json!({"partner_id": "P1", "credential_id": "C1"});

    let (status, _) = send(app.router(), post_json("/webhooks/nsdc", &body)).await;
    assert_eq!(status, StatusCode::OK);

    // The channel is now full and nobody is draining it.
    let started = Instant::now();
    let (status, ack) = send(app.router(), post_json("/webhooks/nsdc", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
}

#[tokio::test]
async fn test_webhook_reaches_queue_through_background_intake() {
    let app = TestApp::enabled();
    app.add_issuer(NSDC_PROVIDER, "P1").await;
    let TestApp {
        store,
        pipeline,
        shutdown,
    } = app;
    let (state, tasks) = pipeline.spawn(&shutdown);
    let router = app_router(state);

    let (status, _) = send(
        router,
        post_json("/webhooks/nsdc", &json!({"partner_id": "P1", "credential_id": "C1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.jobs().await.is_empty() {
        assert!(Instant::now() < deadline, "webhook never reached the queue");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let jobs = store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload.raw_credential.id, "C1");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), tasks.join())
        .await
        .expect("background tasks stop on shutdown");
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stats_on_empty_store() {
    let app = TestApp::enabled();
    let (status, body) = send(app.router(), get("/admin/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_external"], 0);
    assert_eq!(body["dlq_count"], 0);
    assert_eq!(body["queue_pending"], 0);
    assert_eq!(body["feature_enabled"], true);
    assert_eq!(body["match_threshold"], 0.85);
}

#[tokio::test]
async fn test_issuers_include_sync_state() {
    let app = TestApp::enabled();
    let synced = app.add_issuer(NSDC_PROVIDER, "P1").await;
    let never = app.add_issuer(DIGILOCKER_PROVIDER, "D1").await;
    app.store
        .record_sync(synced.id, NSDC_PROVIDER, chrono::Utc::now())
        .await
        .unwrap();

    let (status, body) = send(app.router(), get("/admin/issuers")).await;
    assert_eq!(status, StatusCode::OK);
    let issuers = body.as_array().unwrap();
    assert_eq!(issuers.len(), 2);

    let find = |id: IssuerId| {
        issuers
            .iter()
            .find(|i| i["id"] == json!(id))
            .unwrap()
            .clone()
    };
    assert!(find(synced.id)["last_successful_sync_at"].is_string());
    assert!(find(never.id)["last_successful_sync_at"].is_null());
    assert_eq!(find(never.id)["pollable"], true);
}

#[tokio::test]
async fn test_credential_listing_clamps_limit_and_validates_status() {
    let app = TestApp::enabled();

    let (status, body) = send(app.router(), get("/admin/pending-matches?limit=500")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 100);
    assert_eq!(body["total"], 0);

    let (status, _) = send(
        app.router(),
        get("/admin/external-credentials?status=verified&limit=10"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(app.router(), get("/admin/external-credentials?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dlq_routes_on_unknown_entries() {
    let app = TestApp::enabled();
    let missing = credsync_core::DlqEntryId::new();

    let (status, body) = send(app.router(), get("/admin/dlq")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["has_more"], false);

    let (status, body) = send(
        app.router(),
        post_json(&format!("/admin/dlq/{missing}/retry"), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "dlq_entry_not_found");

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/dlq/{missing}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(app.router(), delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        app.router(),
        post_json("/admin/dlq/retry", &json!({"ids": [missing]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["not_found"], json!([missing]));

    let (status, body) = send(app.router(), post_json("/admin/dlq/retry", &json!({"ids": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_manual_sync_errors() {
    let app = TestApp::enabled();
    let missing = IssuerId::new();
    let (status, body) = send(
        app.router(),
        post_json(&format!("/admin/issuers/{missing}/sync"), &json!({"full_sync": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "issuer_not_found");

    let disabled = TestApp::disabled();
    let issuer = disabled.add_issuer(NSDC_PROVIDER, "P1").await;
    let (status, body) = send(
        disabled.router(),
        post_json(&format!("/admin/issuers/{}/sync", issuer.id), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "External sync disabled");
}

#[tokio::test]
async fn test_subscribe_reports_unsupported_provider() {
    let app = TestApp::enabled();
    let issuer = app.add_issuer(DIGILOCKER_PROVIDER, "D1").await;

    let (status, body) = send(
        app.router(),
        post_json(
            &format!("/admin/issuers/{}/subscribe", issuer.id),
            &json!({"callback_url": "https://sync.example.org/webhooks/digilocker"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribed"], false);
    assert_eq!(body["callback_url"], "https://sync.example.org/webhooks/digilocker");

    // Without a configured base URL the callback must be supplied.
    let (status, body) = send(
        app.router(),
        post_json(&format!("/admin/issuers/{}/subscribe", issuer.id), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_scheduler_status_and_trigger() {
    let app = TestApp::enabled();
    app.add_issuer(DIGILOCKER_PROVIDER, "D1").await;

    let (status, body) = send(app.router(), get("/admin/scheduler")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["poll_interval_ms"], 300_000);

    let (status, body) = send(app.router(), post_json("/admin/scheduler/poll", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ran"], true);
    assert_eq!(body["summary"]["issuers_polled"], 1);

    let (_, body) = send(app.router(), get("/admin/scheduler")).await;
    assert!(body["last_poll_at"].is_string());
}
