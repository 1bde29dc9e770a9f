//! Application entry point and server initialization
//!
//! This module contains the main function that:
//! - Loads environment configuration
//! - Opens the database and connects the storage backend
//! - Starts the HTTP server with graceful shutdown support

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pathtrami::config::{Config, StorageConfig};
use pathtrami::database::init_db;
use pathtrami::identity::GoogleIdentity;
use pathtrami::repository::PlaceRepository;
use pathtrami::route::{create_app, object_routes};
use pathtrami::state::AppState;
use pathtrami::storage::{MemoryStore, ObjectStore, OpendalStore};

/// Application entry point
///
/// # Environment Variables
///
/// - `PORT` - Server port number (default: 8080)
/// - `DATABASE_URL` - Path to database file (default: "data.db")
/// - `STORAGE_BACKEND` - `memory`, `s3` or `r2` (default: "memory")
/// - `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` - OAuth client credentials
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pathtrami=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let db = init_db(&config.database_url)
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let (storage, memory_store) = match &config.storage {
        StorageConfig::Memory { public_base_url } => {
            tracing::warn!("using in-memory object storage, uploads are not persisted");
            let store = Arc::new(MemoryStore::new(public_base_url.clone()));
            let shared: Arc<dyn ObjectStore> = store.clone();
            (shared, Some(store))
        }
        StorageConfig::S3 {
            settings,
            public_base_url,
        } => {
            let store: Arc<dyn ObjectStore> = Arc::new(
                OpendalStore::s3(settings, public_base_url.clone(), config.upload_url_ttl)
                    .context("failed to configure object storage")?,
            );
            (store, None)
        }
    };

    let state = AppState {
        repo: PlaceRepository::new(Arc::new(db)),
        storage,
        identity: Arc::new(GoogleIdentity::new(config.google.clone())),
    };

    let mut app = create_app(state);
    if let Some(store) = memory_store {
        app = app.merge(object_routes(store));
    }
    let app = app.layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(port = config.port, database = %config.database_url, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Handles graceful shutdown signals
///
/// Returns when SIGINT (Ctrl+C) or, on Unix, SIGTERM is received. Open
/// connections are allowed to complete before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, stopping server");
}
