//! Request/Response Models for the Coordinator API
//!
//! Closed record types per endpoint; nothing here is an open map.

use serde::{Deserialize, Serialize};

use chunkvault_core::{ContentHash, NodeUrl, RedundancyMode, StreamId, StreamStatus};

use crate::catalog::FragmentMeta;
use crate::redundancy::RedundancyConfig;

// ============================================================
// STREAMS
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub title: String,
    pub duration_sec: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListStreamsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: StreamStatus,
}

#[derive(Debug, Serialize)]
pub struct PopularityResponse {
    pub stream_id: StreamId,
    pub popularity: u64,
}

// ============================================================
// CHUNK COMMIT
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub stream_id: StreamId,
    pub sequence_num: u64,
    pub size_bytes: u64,
    pub hash: ContentHash,
    pub redundancy_mode: RedundancyMode,
    /// Candidate nodes holding full copies (replicated mode).
    #[serde(default)]
    pub node_urls: Vec<NodeUrl>,
    /// Fragment placements (erasure mode).
    #[serde(default)]
    pub fragments: Vec<FragmentMeta>,
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub success: bool,
    pub committed_nodes: Vec<NodeUrl>,
    pub ballot: i64,
    pub message: String,
}

// ============================================================
// NODES
// ============================================================

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_url: String,
    pub node_id: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterNodeResponse {
    pub node_id: String,
    pub node_url: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    /// Disk usage fraction in `[0, 1]`.
    pub disk_usage: f64,
    pub chunk_count: u64,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoordinatorHealthResponse {
    pub status: String,
    pub service: String,
    pub healthy_nodes: u64,
    pub total_nodes: u64,
    pub database_status: String,
}

// ============================================================
// REDUNDANCY
// ============================================================

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub stream_id: StreamId,
    pub popularity: u64,
    pub mode: RedundancyMode,
    pub config: RedundancyConfig,
    /// True when the mode is already frozen by a committed chunk.
    pub frozen: bool,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub mode: RedundancyMode,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub stream_id: StreamId,
    pub override_mode: Option<RedundancyMode>,
    /// The frozen mode, when the stream already committed chunks; overrides
    /// have no effect on it.
    pub frozen_mode: Option<RedundancyMode>,
}

#[derive(Debug, Serialize)]
pub struct EfficiencyResponse {
    pub replicated: RedundancyConfig,
    pub erasure: RedundancyConfig,
    /// Fractional savings of erasure versus replication.
    pub expected_savings: f64,
}
