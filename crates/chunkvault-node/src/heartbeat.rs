//! Heartbeat Task - Node Liveness Reporting
//!
//! On startup the node registers itself with the coordinator, retrying for
//! up to a minute while the coordinator comes up. After registration a
//! background loop reports disk usage and chunk count on every heartbeat
//! interval until the task is cancelled.
//!
//! Heartbeat failures are logged and tolerated; the coordinator derives the
//! node's liveness from heartbeat age, so a few missed beats only matter if
//! they persist past the timeout.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::store::ChunkStore;

const MAX_REGISTRATION_ATTEMPTS: u32 = 12;
const REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    node_url: &'a str,
    node_id: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    disk_usage: f64,
    chunk_count: usize,
    version: &'a str,
}

/// Background task that registers the node and sends periodic heartbeats.
pub struct HeartbeatTask {
    node_id: String,
    node_url: String,
    coordinator_url: String,
    interval: Duration,
    store: Arc<ChunkStore>,
    client: reqwest::Client,
}

impl HeartbeatTask {
    pub fn new(
        node_id: String,
        node_url: String,
        coordinator_url: String,
        interval: Duration,
        store: Arc<ChunkStore>,
    ) -> Self {
        Self {
            node_id,
            node_url,
            coordinator_url,
            interval,
            store,
            client: reqwest::Client::new(),
        }
    }

    /// Register, then heartbeat until ctrl-c.
    pub async fn run(self) {
        if !self.register_with_retry().await {
            warn!(
                node_id = %self.node_id,
                "Continuing without coordinator registration"
            );
        }

        info!(
            node_id = %self.node_id,
            interval_seconds = self.interval.as_secs(),
            "Heartbeat task started"
        );

        let mut heartbeat_count: u64 = 0;
        let mut failure_count: u64 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(node_id = %self.node_id, "Heartbeat task received shutdown signal");
                    break;
                }
            }

            match self.send_heartbeat().await {
                Ok(()) => {
                    heartbeat_count += 1;
                    failure_count = 0;
                    debug!(node_id = %self.node_id, count = heartbeat_count, "Heartbeat sent");
                }
                Err(e) => {
                    failure_count += 1;
                    error!(
                        node_id = %self.node_id,
                        error = %e,
                        failure_count,
                        "Heartbeat failed"
                    );
                    if failure_count >= 3 {
                        warn!(
                            node_id = %self.node_id,
                            failure_count,
                            "Consecutive heartbeat failures; coordinator may mark this node down"
                        );
                    }
                }
            }
        }

        info!(
            node_id = %self.node_id,
            total_heartbeats = heartbeat_count,
            "Heartbeat task stopped"
        );
    }

    async fn register_with_retry(&self) -> bool {
        for attempt in 1..=MAX_REGISTRATION_ATTEMPTS {
            match self.register().await {
                Ok(()) => {
                    info!(
                        node_id = %self.node_id,
                        coordinator = %self.coordinator_url,
                        "Registered with coordinator"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max = MAX_REGISTRATION_ATTEMPTS,
                        error = %e,
                        "Registration attempt failed"
                    );
                    tokio::time::sleep(REGISTRATION_RETRY_INTERVAL).await;
                }
            }
        }
        false
    }

    async fn register(&self) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/nodes/register", self.coordinator_url))
            .json(&RegisterRequest {
                node_url: &self.node_url,
                node_id: &self.node_id,
                version: NODE_VERSION,
            })
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<(), reqwest::Error> {
        let chunk_count = self.store.chunk_count().await;
        self.client
            .post(format!(
                "{}/nodes/{}/heartbeat",
                self.coordinator_url, self.node_id
            ))
            .json(&HeartbeatRequest {
                disk_usage: self.store.disk_usage(),
                chunk_count,
                version: NODE_VERSION,
            })
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
