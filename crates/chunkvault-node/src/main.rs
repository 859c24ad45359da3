//! Storage node daemon entry point.
//!
//! Configuration comes from environment variables (see [`NodeConfig`]);
//! logging is controlled via `RUST_LOG`.

use std::sync::Arc;

use chunkvault_node::heartbeat::HeartbeatTask;
use chunkvault_node::{create_router, serve, AppState, ChunkStore, NodeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::from_env();
    tracing::info!(
        node_id = %config.node_id,
        data_dir = %config.data_dir.display(),
        port = config.port,
        "Starting storage node"
    );

    let store = Arc::new(
        ChunkStore::open(
            &config.data_dir,
            config.max_superblock_size,
            config.capacity_bytes,
        )
        .await?,
    );

    // Registration + heartbeats run only when a coordinator is configured.
    if let Some(coordinator_url) = config.coordinator_url.clone() {
        let task = HeartbeatTask::new(
            config.node_id.clone(),
            config.node_url.clone(),
            coordinator_url,
            config.heartbeat_interval,
            store.clone(),
        );
        tokio::spawn(task.run());
    } else {
        tracing::warn!("COORDINATOR_URL not set; skipping registration and heartbeats");
    }

    let state = AppState {
        store: store.clone(),
        node_id: config.node_id.clone(),
    };
    serve(create_router(state), config.port).await?;

    // Durable-state flush on the way out.
    if let Err(e) = store.flush().await {
        tracing::error!(error = %e, "Failed to flush index during shutdown");
    } else {
        tracing::info!("Index flushed; storage node exited cleanly");
    }
    Ok(())
}
