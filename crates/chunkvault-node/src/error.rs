//! Storage Node Error Types
//!
//! ## Error Categories
//!
//! ### Request Errors
//! - `InvalidChunkId`: id fails the `[A-Za-z0-9_-]{1,64}` format check
//! - `EmptyChunk`: zero-length body
//! - `ChunkTooLarge`: body exceeds the payload ceiling
//! - `IntegrityMismatch`: supplied or stored hash disagrees with computed
//!
//! ### Storage Errors
//! - `NotFound`: chunk id absent from the index
//! - `CorruptionDetected`: short read, I/O failure, or hash mismatch on read
//! - `CapacityExhausted`: disk usage at or above the critical threshold
//! - `StorageFault`: append or fsync failed; the index entry is not published
//! - `WriteInProgress`: delete attempted while a put holds the writer lock

use thiserror::Error;

use chunkvault_core::ChunkId;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid chunk id: {0}")]
    InvalidChunkId(String),

    #[error("Empty chunk body")]
    EmptyChunk,

    #[error("Chunk size {size} exceeds maximum {limit}")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("Checksum mismatch: expected {expected}, computed {computed}")]
    IntegrityMismatch { expected: String, computed: String },

    #[error("Chunk not found: {0}")]
    NotFound(ChunkId),

    #[error("Chunk corruption detected: {0}")]
    CorruptionDetected(String),

    #[error("Insufficient storage space: disk usage {usage:.2}")]
    CapacityExhausted { usage: f64 },

    #[error("Storage fault: {0}")]
    StorageFault(String),

    #[error("Chunk {0} has a write in progress")]
    WriteInProgress(ChunkId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
