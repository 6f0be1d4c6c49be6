//! blobdrop
//!
//! Temporary file hosting: upload a file directly or in chunks, get a
//! short single-use download link. Files are deleted after their first
//! successful download or after the retention window, whichever comes
//! first.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod download;
mod error;
mod guard;
mod notify;
mod routes;
mod state;
mod storage;
mod sweep;
mod upload;

#[cfg(test)]
mod testing;

use config::Config;
use db::{FileStore, PgFileStore, PgReputationStore, ReputationStore};
use state::AppState;
use storage::{BlobStore, S3Store};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobdrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting blobdrop v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 bucket: {}", config.storage.bucket);
    tracing::info!(
        "Upload limit: {} bytes, retention: {}h",
        config.limits.max_upload_bytes,
        config.limits.retention_hours
    );

    // Initialize S3 storage
    let blob: Arc<dyn BlobStore> = Arc::new(
        S3Store::new(&config.storage)
            .await
            .expect("Failed to initialize S3 storage"),
    );

    // Initialize database
    let pool = db::create_pool(&config.database.url)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database schema initialized");

    let files: Arc<dyn FileStore> = Arc::new(PgFileStore::new(pool.clone()));
    let reputation: Arc<dyn ReputationStore> = Arc::new(PgReputationStore::new(pool));

    // Create application state
    let app_state = AppState::new(config.clone(), files.clone(), reputation, blob.clone());

    // Background tasks: stale-session reaper and expired-file sweeper
    app_state.engine().start_reaper(60);
    sweep::start_sweeper(files, blob, config.limits.sweep_interval_secs);

    // Build router
    let app = routes::app(app_state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("blobdrop listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server port");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shutdown complete");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
