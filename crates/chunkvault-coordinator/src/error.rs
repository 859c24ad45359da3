//! Coordinator Error Types
//!
//! ## Error Categories
//!
//! ### Catalog Errors
//! - `StreamNotFound` / `ChunkNotFound` / `NodeNotFound`: entity absent
//! - `Database`: underlying SQLite operation failed
//!
//! ### Placement Errors
//! - `InsufficientReplicas`: commit requested on fewer than two nodes
//! - `QuorumNotReached`: presence could not be confirmed on enough nodes
//! - `BallotConflict`: a higher ballot was promised while committing;
//!   the caller should retry with backoff
//!
//! ### Request Errors
//! - `InvalidRequest`: malformed field, unknown mode, bad id

use thiserror::Error;

use chunkvault_core::{ChunkId, CoreError, StreamId};

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("At least 2 nodes required for commit, got {0}")]
    InsufficientReplicas(usize),

    #[error("Quorum not reached: {confirmed}/{required} nodes confirmed")]
    QuorumNotReached { confirmed: usize, required: usize },

    #[error("Ballot conflict: {promised} already promised, proposal at {proposed}")]
    BallotConflict { promised: i64, proposed: i64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Corrupt catalog row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
