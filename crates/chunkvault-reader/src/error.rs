//! Reader Error Types
//!
//! ## Retry Classification
//!
//! - `NotFound` is never retried on the same node; the chunk is simply not
//!   there and further attempts are wasted.
//! - `IntegrityMismatch`, `Transport`, and `Timeout` are retried on the
//!   next-best replica with bounded backoff.
//! - `AllReplicasExhausted` fails the one chunk; the session continues with
//!   later chunks and records a playout gap, never an abort.

use thiserror::Error;

use chunkvault_core::{ChunkId, CoreError};

pub type Result<T> = std::result::Result<T, ReaderError>;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Manifest fetch failed: {0}")]
    ManifestFetch(String),

    #[error("Chunk {chunk} not found on {node}")]
    NotFound { node: String, chunk: ChunkId },

    #[error("Integrity mismatch for chunk {0}")]
    IntegrityMismatch(ChunkId),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Deadline exceeded")]
    Timeout,

    #[error("All replicas exhausted for chunk {0}")]
    AllReplicasExhausted(ChunkId),

    #[error("Insufficient fragments for chunk {0}")]
    InsufficientFragments(ChunkId),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ReaderError {
    /// True when another attempt against the same node could succeed.
    pub fn retryable_same_node(&self) -> bool {
        matches!(self, ReaderError::Transport(_) | ReaderError::Timeout)
    }
}
