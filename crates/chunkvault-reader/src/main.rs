//! Reader binary: fetch a stream's manifest and play it out, logging
//! progress and a final session report.
//!
//! Environment: `COORDINATOR_URL` (default http://localhost:8080) and
//! `STREAM_ID` (required), plus the knobs in [`ReaderConfig`].

use std::sync::Arc;
use tokio::sync::mpsc;

use chunkvault_core::StreamId;
use chunkvault_reader::{
    CoordinatorClient, HttpNodeClient, ReadSession, ReaderConfig, SessionEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let coordinator_url =
        std::env::var("COORDINATOR_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let stream_id = StreamId::parse(
        &std::env::var("STREAM_ID").map_err(|_| "STREAM_ID environment variable is required")?,
    )
    .map_err(|e| format!("invalid STREAM_ID: {e}"))?;

    let config = ReaderConfig::from_env();
    let coordinator = CoordinatorClient::new(&coordinator_url);

    tracing::info!(%stream_id, coordinator = %coordinator_url, "Fetching manifest");
    let manifest = coordinator.fetch_manifest(stream_id).await?;
    tracing::info!(
        title = %manifest.title,
        chunks = manifest.total_chunks,
        duration_sec = manifest.duration_sec,
        "Manifest received"
    );

    // Reader access counts toward popularity.
    if let Err(e) = coordinator.record_view(stream_id).await {
        tracing::warn!(error = %e, "Failed to record view");
    }

    let session = ReadSession::new(manifest, Arc::new(HttpNodeClient::new()), config);
    let (tx, mut rx) = mpsc::channel(16);

    let consumer = tokio::spawn(async move {
        let mut bytes_played = 0u64;
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Chunk(chunk) => {
                    bytes_played += chunk.data.len() as u64;
                    tracing::info!(
                        sequence = chunk.sequence,
                        chunk_id = %chunk.chunk_id,
                        bytes_played,
                        "Played chunk"
                    );
                }
                SessionEvent::Gap(seq) => {
                    tracing::warn!(sequence = seq, "Playout gap: chunk unavailable");
                }
            }
        }
        bytes_played
    });

    let summary = session.run(tx).await?;
    let bytes_played = consumer.await.unwrap_or(0);

    tracing::info!(
        title = %summary.stream_title,
        chunks = summary.chunks_emitted,
        gaps = summary.gaps,
        stalls = summary.stalls,
        bytes_played,
        startup_ms = summary.startup_latency.map(|d| d.as_millis() as u64),
        downloads = summary.scheduler.total_downloads,
        failovers = summary.scheduler.failovers,
        "Session report"
    );
    for condition in &summary.node_conditions {
        tracing::info!(
            node = %condition.node_url,
            score = condition.score,
            latency_ms = condition.mean_latency_ms,
            reliability = condition.reliability,
            bandwidth_mbps = condition.mean_bandwidth_mbps,
            "Node condition"
        );
    }
    Ok(())
}
