//! Core Error Types
//!
//! Errors for identity validation and erasure coding. Component crates wrap
//! these in their own error enums via `#[from]`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid chunk id: {0}")]
    InvalidChunkId(String),

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Invalid erasure parameters: {data} data + {parity} parity shards")]
    InvalidErasureParams { data: usize, parity: usize },

    #[error("Insufficient fragments: need {needed}, have {available}")]
    InsufficientFragments { needed: usize, available: usize },

    #[error("Erasure reconstruction failed: {0}")]
    ReconstructionFailed(String),
}
