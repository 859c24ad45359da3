//! Catalog - the Coordinator's Durable State
//!
//! The catalog tracks streams, chunks, replicas, fragments, storage nodes,
//! placement proposals, and per-stream popularity. The [`Catalog`] trait
//! abstracts the backend so the HTTP layer and the placement driver depend
//! only on `Arc<dyn Catalog>`; [`SqliteCatalog`] is the shipped
//! implementation.
//!
//! ## Ownership
//!
//! The catalog is mutated only by the coordinator. Writers and readers
//! interact with it exclusively through the coordinator's request surface.
//!
//! ## Transactionality
//!
//! Catalog updates are transactional per request: a chunk commit inserts the
//! chunk row, its replica or fragment rows, the proposal update, and the
//! stream bookkeeping in one transaction, so either all rows become visible
//! together or none do.

pub mod sqlite;

pub use sqlite::SqliteCatalog;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chunkvault_core::{
    ChunkId, ContentHash, NodeId, NodeUrl, RedundancyMode, StreamId, StreamManifest, StreamStatus,
};

use crate::error::Result;

/// A stream row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: StreamId,
    pub title: String,
    pub duration_sec: u64,
    pub total_chunks: u64,
    pub chunk_size_bytes: u64,
    pub chunk_duration_sec: u64,
    pub status: StreamStatus,
    /// Mode frozen at first chunk commit; `None` until then.
    pub redundancy_mode: Option<RedundancyMode>,
    /// Manual override consulted at first commit, if set.
    pub redundancy_override: Option<RedundancyMode>,
    pub created_at: i64,
}

/// A chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub stream_id: StreamId,
    pub sequence: u64,
    pub size_bytes: u64,
    pub hash: ContentHash,
    pub redundancy_mode: RedundancyMode,
    pub created_at: i64,
}

/// Replica lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Pending,
    Active,
    Failed,
}

impl ReplicaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaStatus::Pending => "pending",
            ReplicaStatus::Active => "active",
            ReplicaStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ReplicaStatus::Pending),
            "active" => Some(ReplicaStatus::Active),
            "failed" => Some(ReplicaStatus::Failed),
            _ => None,
        }
    }
}

/// A replica row (replicated mode), keyed `(chunk_id, node_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub chunk_id: ChunkId,
    pub node_url: NodeUrl,
    pub status: ReplicaStatus,
    /// Ballot at which this replica was accepted.
    pub ballot: i64,
    pub created_at: i64,
}

/// A fragment row (erasure mode), keyed `(chunk_id, fragment_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub fragment_id: ChunkId,
    pub chunk_id: ChunkId,
    pub fragment_index: u32,
    pub node_url: NodeUrl,
    pub size_bytes: u64,
    pub hash: ContentHash,
    pub status: ReplicaStatus,
    pub created_at: i64,
}

/// Derived node state, computed on read from heartbeat age and disk usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Healthy,
    Degraded,
    Down,
}

/// A storage node row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_url: NodeUrl,
    pub node_id: NodeId,
    /// Milliseconds since epoch of the last heartbeat.
    pub last_heartbeat: i64,
    /// Disk usage fraction in `[0, 1]`.
    pub disk_usage: f64,
    pub chunk_count: u64,
    pub version: Option<String>,
    pub state: NodeState,
}

/// Placement proposal phase; progresses monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalPhase {
    None,
    Prepare,
    Accept,
    Committed,
}

impl ProposalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalPhase::None => "none",
            ProposalPhase::Prepare => "prepare",
            ProposalPhase::Accept => "accept",
            ProposalPhase::Committed => "committed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(ProposalPhase::None),
            "prepare" => Some(ProposalPhase::Prepare),
            "accept" => Some(ProposalPhase::Accept),
            "committed" => Some(ProposalPhase::Committed),
            _ => None,
        }
    }
}

/// A placement proposal row, keyed by chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub chunk_id: ChunkId,
    pub promised_ballot: i64,
    pub accepted_ballot: i64,
    pub accepted_value: Option<Vec<NodeUrl>>,
    pub phase: ProposalPhase,
}

/// Fragment metadata carried in a commit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMeta {
    pub fragment_index: u32,
    pub node_url: NodeUrl,
    pub size_bytes: u64,
    pub hash: ContentHash,
}

/// The fully verified placement the driver hands to the catalog.
#[derive(Debug, Clone)]
pub struct CommittedPlacement {
    pub chunk_id: ChunkId,
    pub stream_id: StreamId,
    pub sequence: u64,
    pub size_bytes: u64,
    pub hash: ContentHash,
    pub mode: RedundancyMode,
    pub ballot: i64,
    /// Confirming nodes; for erasure mode, one per fragment in order.
    pub nodes: Vec<NodeUrl>,
    /// Present exactly when `mode` is erasure.
    pub fragments: Vec<FragmentMeta>,
}

/// Aggregate storage-overhead report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverheadStats {
    pub replicated_chunks: u64,
    pub erasure_chunks: u64,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    /// physical / logical; 0 when nothing is stored.
    pub overhead_ratio: f64,
    /// Savings versus storing everything at the replication baseline.
    pub savings_vs_replication: f64,
}

/// Node registry health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub total: u64,
    pub healthy: u64,
    pub degraded: u64,
    pub down: u64,
}

/// Durable catalog operations.
#[async_trait]
pub trait Catalog: Send + Sync {
    // ============================================================
    // STREAMS
    // ============================================================

    /// Create a stream in `uploading` status with a generated id.
    async fn create_stream(&self, title: &str, duration_sec: u64) -> Result<StreamRecord>;

    async fn get_stream(&self, stream_id: StreamId) -> Result<Option<StreamRecord>>;

    /// Streams that are not deleted, newest first.
    async fn list_streams(&self, limit: u32, offset: u32) -> Result<Vec<StreamRecord>>;

    async fn set_stream_status(&self, stream_id: StreamId, status: StreamStatus) -> Result<()>;

    /// Assemble the full manifest: chunks in sequence order with their
    /// replica or fragment locations.
    async fn manifest(&self, stream_id: StreamId) -> Result<Option<StreamManifest>>;

    // ============================================================
    // CHUNKS AND PLACEMENT
    // ============================================================

    /// Record a verified placement in one transaction: the chunk row, its
    /// replica or fragment rows, the committed proposal, the stream's
    /// chunk count, and the stream's frozen redundancy mode.
    async fn commit_chunk(&self, placement: &CommittedPlacement) -> Result<()>;

    async fn get_chunk(&self, chunk_id: &ChunkId) -> Result<Option<ChunkRecord>>;

    async fn get_replicas(&self, chunk_id: &ChunkId) -> Result<Vec<ReplicaRecord>>;

    async fn get_fragments(&self, chunk_id: &ChunkId) -> Result<Vec<FragmentRecord>>;

    async fn get_proposal(&self, chunk_id: &ChunkId) -> Result<Option<ProposalRecord>>;

    /// Persist a proposal row outside the commit transaction (prepare and
    /// accept phases).
    async fn save_proposal(&self, proposal: &ProposalRecord) -> Result<()>;

    // ============================================================
    // NODES
    // ============================================================

    /// Register a node, updating the URL in place when the id is known.
    async fn register_node(&self, node_url: &NodeUrl, node_id: &NodeId, version: &str)
        -> Result<()>;

    /// Record a heartbeat. Rejected for unregistered node ids.
    async fn heartbeat(&self, node_id: &NodeId, disk_usage: f64, chunk_count: u64) -> Result<()>;

    /// All registered nodes with state derived at `now_ms`.
    async fn list_nodes(&self, now_ms: i64, timeout_ms: i64) -> Result<Vec<NodeRecord>>;

    /// Nodes whose heartbeat is fresh and whose disk usage is below the
    /// warning threshold, least-loaded first.
    async fn healthy_nodes(&self, now_ms: i64, timeout_ms: i64, warn: f64)
        -> Result<Vec<NodeRecord>>;

    // ============================================================
    // POPULARITY AND REDUNDANCY
    // ============================================================

    /// Increment and return the stream's popularity counter.
    async fn increment_popularity(&self, stream_id: StreamId) -> Result<u64>;

    async fn get_popularity(&self, stream_id: StreamId) -> Result<u64>;

    async fn set_redundancy_override(
        &self,
        stream_id: StreamId,
        mode: RedundancyMode,
    ) -> Result<()>;

    async fn clear_redundancy_override(&self, stream_id: StreamId) -> Result<()>;

    async fn overhead_stats(&self) -> Result<OverheadStats>;
}
