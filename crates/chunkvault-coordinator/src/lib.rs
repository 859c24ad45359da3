//! ChunkVault Coordinator
//!
//! The coordinator keeps the durable catalog of streams, chunks, replicas,
//! fragments, and node presence; executes the per-chunk placement commit
//! protocol; selects redundancy modes by popularity; and dispenses stream
//! manifests to readers.
//!
//! ## Architecture
//!
//! ```text
//! writer ── POST /chunks/{id}/commit ──► PlacementDriver ── HEAD ──► nodes
//!                                              │ verified quorum
//!                                              ▼
//!                                        Catalog (SQLite)
//!                                              ▲
//! reader ── GET /streams/{id}/manifest ────────┘
//! nodes  ── POST /nodes/{id}/heartbeat ────────┘
//! ```
//!
//! Node health is derived on read from heartbeat age and reported disk
//! usage; there is no background state machine.

pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod placement;
pub mod redundancy;

pub use catalog::{Catalog, SqliteCatalog};
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
pub use placement::{HttpPresenceChecker, PlacementDriver, PresenceChecker};
pub use redundancy::RedundancyPolicy;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub placement: Arc<PlacementDriver>,
    pub policy: RedundancyPolicy,
    pub config: CoordinatorConfig,
}

/// Build the coordinator router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Streams
        .route(
            "/streams",
            get(handlers::streams::list_streams).post(handlers::streams::create_stream),
        )
        .route("/streams/:stream_id", get(handlers::streams::get_stream))
        .route(
            "/streams/:stream_id/status",
            axum::routing::patch(handlers::streams::update_status),
        )
        .route(
            "/streams/:stream_id/manifest",
            get(handlers::streams::get_manifest),
        )
        .route(
            "/streams/:stream_id/popularity",
            get(handlers::streams::get_popularity),
        )
        .route(
            "/streams/:stream_id/view",
            post(handlers::streams::record_view),
        )
        // Chunks
        .route(
            "/chunks/:chunk_id/commit",
            post(handlers::chunks::commit_chunk),
        )
        .route(
            "/chunks/:chunk_id/fragments",
            get(handlers::chunks::get_fragments),
        )
        .route(
            "/chunks/:chunk_id/proposal",
            get(handlers::chunks::get_proposal),
        )
        // Nodes
        .route("/nodes/register", post(handlers::nodes::register))
        .route(
            "/nodes/:node_id/heartbeat",
            post(handlers::nodes::heartbeat),
        )
        .route("/nodes/healthy", get(handlers::nodes::healthy_nodes))
        .route("/nodes", get(handlers::nodes::list_nodes))
        .route("/nodes/summary", get(handlers::nodes::summary))
        // Redundancy
        .route(
            "/redundancy/recommend/:stream_id",
            get(handlers::redundancy::recommend),
        )
        .route(
            "/redundancy/override/:stream_id",
            post(handlers::redundancy::set_override)
                .delete(handlers::redundancy::clear_override),
        )
        .route("/redundancy/efficiency", get(handlers::redundancy::efficiency))
        .route("/redundancy/overhead", get(handlers::redundancy::overhead))
        // Service health
        .route("/health", get(handlers::nodes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until the process receives a shutdown signal.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Coordinator listening on {addr}");
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
