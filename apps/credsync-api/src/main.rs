//! credsync API server
//!
//! Receives provider webhooks, runs the credential worker pool, intake
//! consumer and sync scheduler, and serves the admin surface.

use std::net::SocketAddr;
use std::sync::Arc;

use credsync_api::config::ApiSetuConfig;
use credsync_api::{app_router, build_pipeline, logging, subscribe, Config, KmsConfig, PipelineSettings};
use credsync_connector::{
    ConnectorRegistry, DigiLockerConnector, JwksCache, NsdcConfig, NsdcConnector,
};
use credsync_core::JwksSnapshotStore;
use credsync_db::{run_migrations, PgStore};
use credsync_kms::{Kms, KmsError, LocalKms};
use credsync_sync::SyncStores;
use secrecy::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MASTER_KEY_ID: &str = "kms-master";

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        sync_enabled = config.flags.enabled,
        "Starting credsync API"
    );
    if !config.flags.enabled {
        warn!("EXTERNAL_SYNC_ENABLED is off: webhooks answer 503 and the scheduler idles");
    }

    let store = match PgStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };
    info!("Database connection established");

    if let Err(e) = run_migrations(store.pool()).await {
        error!("Failed to run migrations: {e}");
        std::process::exit(1);
    }

    let kms = match build_kms(&config.kms) {
        Ok(kms) => kms,
        Err(e) => {
            error!("Failed to initialise KMS: {e}");
            std::process::exit(1);
        }
    };
    info!(key_id = kms.key_id(), "KMS ready");

    let connectors = match build_connectors(&config.apisetu, store.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("Failed to build connector registry: {e}");
            std::process::exit(1);
        }
    };
    info!(providers = connectors.len(), "Connector registry built");

    let shutdown = CancellationToken::new();
    let pipeline = build_pipeline(
        PipelineSettings::from_config(&config),
        SyncStores::from_backend(store),
        connectors,
        kms,
        &shutdown,
    );
    let (state, tasks) = pipeline.spawn(&shutdown);

    if config.flags.enabled && config.flags.auto_subscribe_webhooks {
        subscribe::auto_subscribe(&state).await;
    }

    let app = app_router(state);

    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%addr, "Server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // Stop background tasks even when the server exited on its own.
    shutdown.cancel();
    tasks.join().await;

    if let Err(e) = serve_result {
        error!("Server error: {e}");
        std::process::exit(1);
    }
    info!("Server shutdown complete");
}

fn build_kms(config: &KmsConfig) -> Result<Arc<dyn Kms>, KmsError> {
    let kms = match config {
        KmsConfig::Local { dev_key } => {
            warn!("Using the local development KMS key");
            LocalKms::dev(dev_key.expose_secret())?
        }
        KmsConfig::Master { key } => LocalKms::from_base64(MASTER_KEY_ID, key.expose_secret())?,
    };
    Ok(Arc::new(kms))
}

fn build_connectors(
    apisetu: &ApiSetuConfig,
    snapshots: Arc<PgStore>,
) -> Result<ConnectorRegistry, credsync_connector::ConnectorError> {
    let snapshots: Arc<dyn JwksSnapshotStore> = snapshots;
    let jwks = JwksCache::with_default_client()?.with_snapshots(snapshots);

    if apisetu.client_id.is_empty() {
        warn!("APISETU_CLIENT_ID is not set; NSDC pulls will fail to authenticate");
    }
    let nsdc = NsdcConnector::new(
        NsdcConfig::new(
            apisetu.base_url.clone(),
            apisetu.client_id.clone(),
            apisetu.client_secret.clone(),
        ),
        jwks,
    )?;

    Ok(ConnectorRegistry::new()
        .with(Arc::new(nsdc))
        .with(Arc::new(DigiLockerConnector::new())))
}

/// Resolve on Ctrl+C or SIGTERM, then cancel `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }

    shutdown.cancel();
}
