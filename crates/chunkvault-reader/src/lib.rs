//! ChunkVault Adaptive Reader
//!
//! Fetches a stream manifest from the coordinator, continuously probes
//! every candidate storage node, scores nodes on measured bandwidth,
//! reliability, and latency, and downloads chunks in parallel from the
//! best replicas into an ordered playout buffer, failing over on error.
//!
//! ## Components
//!
//! - [`probe::ProbeEngine`] — sliding-window measurements and scoring
//! - [`scheduler::ChunkScheduler`] — replica selection, bounded retries,
//!   failover, erasure reconstruction
//! - [`buffer::PlayoutBuffer`] — the `buffering | playing | stalled |
//!   finished` state machine with strict in-order emission
//! - [`session::ReadSession`] — ties the three together for one playback

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod probe;
pub mod scheduler;
pub mod session;

pub use buffer::{BufferedChunk, PlaybackState, PlayoutBuffer, PlayoutEvent};
pub use client::{CoordinatorClient, HttpNodeClient, NodeClient};
pub use config::ReaderConfig;
pub use error::{ReaderError, Result};
pub use probe::ProbeEngine;
pub use scheduler::ChunkScheduler;
pub use session::{ReadSession, SessionEvent, SessionSummary};
