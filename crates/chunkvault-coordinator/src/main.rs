//! Coordinator daemon entry point.

use std::sync::Arc;

use chunkvault_coordinator::{
    create_router, serve, AppState, CoordinatorConfig, HttpPresenceChecker, PlacementDriver,
    RedundancyPolicy, SqliteCatalog,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = CoordinatorConfig::from_env();
    tracing::info!(
        database = %config.database_path.display(),
        port = config.port,
        node_timeout_sec = config.node_timeout.as_secs(),
        popularity_threshold = config.popularity_threshold,
        "Starting coordinator"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let catalog = Arc::new(SqliteCatalog::new(&config.database_path).await?);

    let placement = Arc::new(PlacementDriver::new(
        catalog.clone(),
        Arc::new(HttpPresenceChecker::new()),
        config.probe_timeout,
    ));

    let state = AppState {
        catalog,
        placement,
        policy: RedundancyPolicy::new(config.popularity_threshold),
        config: config.clone(),
    };

    serve(create_router(state), config.port).await?;
    tracing::info!("Coordinator exited cleanly");
    Ok(())
}
