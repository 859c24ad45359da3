//! ChunkVault Core Types
//!
//! This crate holds the vocabulary shared by every ChunkVault component:
//! the storage node, the coordinator, and the adaptive reader.
//!
//! ## What Lives Here
//!
//! - **Identities** ([`ChunkId`], [`StreamId`], [`NodeId`], [`NodeUrl`]):
//!   distinct newtypes so the compiler rejects a node id where a chunk id
//!   is expected.
//! - **Hashing** ([`ContentHash`]): sha-256 content hashes in lowercase hex,
//!   used for every integrity check in the system.
//! - **Manifests** ([`StreamManifest`], [`ManifestChunk`]): the immutable
//!   per-stream listing the coordinator hands to readers.
//! - **Erasure coding** ([`ErasureCodec`]): Reed-Solomon encode/reconstruct
//!   for cold streams stored as K+M fragments.
//!
//! ## Design Decisions
//!
//! - Identities serialize transparently as strings so the wire format stays
//!   exactly what the HTTP surfaces expect.
//! - The manifest uses closed record types with a two-variant location enum
//!   rather than optional fields, so a replicated entry can never carry
//!   fragments and vice versa.

pub mod erasure;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;

pub use erasure::ErasureCodec;
pub use error::{CoreError, Result};
pub use hash::ContentHash;
pub use id::{ChunkId, NodeId, NodeUrl, StreamId};
pub use manifest::{
    ChunkLocations, FragmentLocation, ManifestChunk, RedundancyMode, StreamManifest, StreamStatus,
};

/// Nominal chunk payload size (2 MiB).
pub const CHUNK_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// Transport slack allowed on top of the payload ceiling.
pub const CHUNK_SIZE_MARGIN: usize = 1024;

/// Nominal chunk duration in seconds of playout.
pub const CHUNK_DURATION_SEC: u64 = 10;
