//! HTTP Clients for Nodes and the Coordinator
//!
//! [`NodeClient`] is the seam between the reader's scheduling logic and the
//! network: probes and chunk fetches go through it, so tests can script a
//! fleet of fake nodes with arbitrary latency, corruption, and failures.
//! [`HttpNodeClient`] is the production implementation over reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use chunkvault_core::{ChunkId, StreamId, StreamManifest};

use crate::error::{ReaderError, Result};

/// Network operations against one storage node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Minimal-latency liveness probe (`HEAD /ping`). The caller measures
    /// wall-clock latency around this call.
    async fn probe(&self, node_url: &str, deadline: Duration) -> Result<()>;

    /// Fetch a chunk or fragment body (`GET /chunk/{id}`).
    async fn fetch_chunk(
        &self,
        node_url: &str,
        chunk_id: &ChunkId,
        deadline: Duration,
    ) -> Result<Bytes>;
}

/// Production node client.
pub struct HttpNodeClient {
    client: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn classify(e: reqwest::Error) -> ReaderError {
        if e.is_timeout() {
            ReaderError::Timeout
        } else {
            ReaderError::Transport(e.to_string())
        }
    }
}

impl Default for HttpNodeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn probe(&self, node_url: &str, deadline: Duration) -> Result<()> {
        let response = self
            .client
            .head(format!("{node_url}/ping"))
            .timeout(deadline)
            .send()
            .await
            .map_err(Self::classify)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReaderError::Transport(format!(
                "probe status {}",
                response.status()
            )))
        }
    }

    async fn fetch_chunk(
        &self,
        node_url: &str,
        chunk_id: &ChunkId,
        deadline: Duration,
    ) -> Result<Bytes> {
        let response = self
            .client
            .get(format!("{node_url}/chunk/{chunk_id}"))
            .timeout(deadline)
            .send()
            .await
            .map_err(Self::classify)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ReaderError::NotFound {
                node: node_url.to_string(),
                chunk: chunk_id.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(ReaderError::Transport(format!(
                "fetch status {}",
                response.status()
            )));
        }
        response.bytes().await.map_err(Self::classify)
    }
}

/// Client for the coordinator's reader-facing surface.
pub struct CoordinatorClient {
    base_url: String,
    client: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the stream manifest.
    pub async fn fetch_manifest(&self, stream_id: StreamId) -> Result<StreamManifest> {
        let response = self
            .client
            .get(format!("{}/streams/{stream_id}/manifest", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ReaderError::ManifestFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ReaderError::ManifestFetch(format!(
                "status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ReaderError::ManifestFetch(e.to_string()))
    }

    /// Record a view; popularity drives redundancy selection for new
    /// streams, so this is best effort but worth sending.
    pub async fn record_view(&self, stream_id: StreamId) -> Result<()> {
        self.client
            .post(format!("{}/streams/{stream_id}/view", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ReaderError::Transport(e.to_string()))?;
        Ok(())
    }
}
