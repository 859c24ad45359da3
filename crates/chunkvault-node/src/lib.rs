//! ChunkVault Storage Node
//!
//! Durable at-most-once storage of chunks identified by externally assigned
//! ids. Chunks are appended to 1 GiB superblock container files and indexed
//! in memory; the index is snapshotted to disk for crash recovery.
//!
//! ## Architecture
//!
//! ```text
//! PUT /chunk/{id} ──► ChunkStore::put ──► SuperblockStore (append + fsync)
//!                                    └──► ChunkIndex (publish + snapshot)
//! GET /chunk/{id} ──► ChunkStore::get ──► index read-lock, lock-free disk
//!                                         read, hash re-verification
//! HEAD /ping      ──► cached counters only (latency probe target)
//! ```
//!
//! A background [`heartbeat::HeartbeatTask`] registers the node with the
//! coordinator and reports disk usage and chunk count on an interval.

pub mod config;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod index;
pub mod store;
pub mod superblock;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use store::ChunkStore;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, head, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use chunkvault_core::{CHUNK_SIZE_BYTES, CHUNK_SIZE_MARGIN};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ChunkStore>,
    pub node_id: String,
}

/// Build the node's router. The body limit sits just above the payload
/// ceiling so the handler can answer an over-limit put with its own 413.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/chunk/:chunk_id",
            put(handlers::put_chunk)
                .get(handlers::get_chunk)
                .head(handlers::head_chunk)
                .delete(handlers::delete_chunk),
        )
        .route("/ping", head(handlers::ping).get(handlers::ping))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(CHUNK_SIZE_BYTES + CHUNK_SIZE_MARGIN))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until the process receives a shutdown signal.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Storage node listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
