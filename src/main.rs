//! Frame Ingest Server
//!
//! Main entry point: bus ingestion, device streaming and live viewer broadcast.

use frame_ingest_server::{
    camera_info_client::{CameraInfoProvider, HttpCameraInfoClient, StaticCameraInfoProvider},
    frame_store::{FrameStore, InMemoryFrameStore, MySqlFrameStore},
    state::{AppConfig, AppState, StoreBackend},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for the bus queue to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frame_ingest_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Frame Ingest Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        store_backend = ?config.store_backend,
        bus_topic = %config.bus_topic,
        camera_info_url = ?config.camera_info_url,
        camera_info_timeout_ms = config.camera_info_timeout.as_millis() as u64,
        viewer_queue_capacity = config.viewer_queue_capacity,
        "Configuration loaded"
    );

    // Create store
    let store: Arc<dyn FrameStore> = match config.store_backend {
        StoreBackend::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&config.database_url)
                .await?;
            tracing::info!("Database connected");
            Arc::new(MySqlFrameStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Arc::new(InMemoryFrameStore::new())
        }
    };

    // Camera metadata provider
    let camera_info: Arc<dyn CameraInfoProvider> = match &config.camera_info_url {
        Some(url) => {
            tracing::info!(url = %url, "CameraInfoClient initialized");
            Arc::new(HttpCameraInfoClient::new(url.clone(), config.camera_info_timeout)?)
        }
        None => {
            tracing::warn!("CAMERA_INFO_URL not set, frames keep their embedded camera_info");
            Arc::new(StaticCameraInfoProvider::new())
        }
    };

    let (state, worker, subscription) = AppState::assemble(config, store, camera_info);

    // Start bus ingest worker
    let worker_handle = worker.spawn(subscription);
    tracing::info!("BusIngestWorker started");

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let addr = format!("{}:{}", state.config.host, state.config.port);

    let app = web_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and its publisher) is gone; the worker drains the queue and exits
    match tokio::time::timeout(DRAIN_TIMEOUT, worker_handle).await {
        Ok(Ok(())) => tracing::info!("Bus queue drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Bus ingest worker panicked"),
        Err(_) => tracing::warn!("Bus queue not drained before timeout, exiting"),
    }

    Ok(())
}
