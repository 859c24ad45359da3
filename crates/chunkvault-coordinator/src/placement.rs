//! Chunk-Placement Commit Protocol
//!
//! The writer uploads a chunk's bytes to a candidate node set, then asks the
//! coordinator to commit that placement. For one chunk id the protocol is:
//!
//! 1. **Ballot.** Pick a ballot strictly greater than any ballot previously
//!    seen for this chunk id.
//! 2. **Prepare.** HEAD every candidate node to confirm it actually holds
//!    the bytes (hash must match). Hung probes count as non-confirmations.
//! 3. **Commit.** With a quorum of confirmations, record the confirming set
//!    transactionally and mark the proposal committed.
//!
//! Proposals for distinct chunk ids never interact: each chunk id gets its
//! own async lock, and the catalog keys proposals by chunk id, so commits
//! for different chunks run fully in parallel.
//!
//! Two writers racing the same chunk id serialize on the per-chunk lock.
//! The loser either observes the committed phase and receives the committed
//! value (idempotent outcome), or its stale ballot is refused at the state
//! update and it retries with a fresh, higher ballot. A committed value and
//! its ballot are never mutated.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chunkvault_core::{ChunkId, ContentHash, NodeUrl, RedundancyMode, StreamId};

use crate::catalog::{
    Catalog, CommittedPlacement, FragmentMeta, ProposalPhase, ProposalRecord,
};
use crate::error::{CoordinatorError, Result};

/// Default deadline for a presence probe during prepare.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum candidate set a commit is accepted for.
const MIN_COMMIT_NODES: usize = 2;

/// Quorum size for a candidate set of `n` nodes.
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Confirms that a node currently holds a chunk with the expected hash.
#[async_trait]
pub trait PresenceChecker: Send + Sync {
    /// Returns the hash the node reports for the chunk, or `None` when the
    /// chunk is absent, the probe times out, or the node errors.
    async fn check(&self, node: &NodeUrl, chunk: &ChunkId, timeout: Duration)
        -> Option<ContentHash>;
}

/// Production presence checker: `HEAD {node}/chunk/{id}`, hash from `ETag`.
pub struct HttpPresenceChecker {
    client: reqwest::Client,
}

impl HttpPresenceChecker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPresenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceChecker for HttpPresenceChecker {
    async fn check(
        &self,
        node: &NodeUrl,
        chunk: &ChunkId,
        timeout: Duration,
    ) -> Option<ContentHash> {
        let url = format!("{}/chunk/{}", node, chunk);
        let response = self
            .client
            .head(&url)
            .timeout(timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let etag = response.headers().get("etag")?.to_str().ok()?;
        ContentHash::parse(etag.trim_matches('"')).ok()
    }
}

/// A placement commit request as received from the writer.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub chunk_id: ChunkId,
    pub stream_id: StreamId,
    pub sequence: u64,
    pub size_bytes: u64,
    pub hash: ContentHash,
    pub mode: RedundancyMode,
    /// Candidate nodes (replicated mode).
    pub node_urls: Vec<NodeUrl>,
    /// Fragment metadata (erasure mode).
    pub fragments: Vec<FragmentMeta>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct PlacementOutcome {
    pub chunk_id: ChunkId,
    pub ballot: i64,
    pub committed_nodes: Vec<NodeUrl>,
    /// True when this call found the chunk already committed.
    pub already_committed: bool,
}

/// Drives the per-chunk commit protocol against the catalog and the nodes.
pub struct PlacementDriver {
    catalog: Arc<dyn Catalog>,
    checker: Arc<dyn PresenceChecker>,
    probe_timeout: Duration,
    ballot_counter: AtomicU64,
    locks: Mutex<HashMap<ChunkId, Arc<Mutex<()>>>>,
}

impl PlacementDriver {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        checker: Arc<dyn PresenceChecker>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            checker,
            probe_timeout,
            ballot_counter: AtomicU64::new(0),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ballot numbers combine wall-clock milliseconds with a process-local
    /// counter so they stay unique across restarts and within one.
    fn generate_ballot(&self) -> i64 {
        let counter = self.ballot_counter.fetch_add(1, Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_millis();
        (now << 16) | (counter as i64 & 0xFFFF)
    }

    async fn chunk_lock(&self, chunk_id: &ChunkId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(chunk_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one commit attempt for one chunk id.
    pub async fn propose(&self, request: PlacementRequest) -> Result<PlacementOutcome> {
        let candidates: Vec<(NodeUrl, ChunkId, ContentHash)> = match request.mode {
            RedundancyMode::Replicated => request
                .node_urls
                .iter()
                .map(|url| (url.clone(), request.chunk_id.clone(), request.hash.clone()))
                .collect(),
            RedundancyMode::Erasure => request
                .fragments
                .iter()
                .map(|f| {
                    (
                        f.node_url.clone(),
                        request.chunk_id.fragment(f.fragment_index),
                        f.hash.clone(),
                    )
                })
                .collect(),
        };

        if candidates.len() < MIN_COMMIT_NODES {
            return Err(CoordinatorError::InsufficientReplicas(candidates.len()));
        }

        // Serialize everything for this chunk id; distinct ids run in parallel.
        let lock = self.chunk_lock(&request.chunk_id).await;
        let _guard = lock.lock().await;

        let existing = self.catalog.get_proposal(&request.chunk_id).await?;
        if let Some(proposal) = &existing {
            if proposal.phase == ProposalPhase::Committed {
                // Idempotent outcome: the committed value is immutable.
                info!(
                    chunk_id = %request.chunk_id,
                    ballot = proposal.accepted_ballot,
                    "Chunk already committed; returning accepted value"
                );
                return Ok(PlacementOutcome {
                    chunk_id: request.chunk_id,
                    ballot: proposal.accepted_ballot,
                    committed_nodes: proposal.accepted_value.clone().unwrap_or_default(),
                    already_committed: true,
                });
            }
        }

        // Strictly dominate every ballot previously seen for this chunk.
        let floor = existing.as_ref().map(|p| p.promised_ballot).unwrap_or(0);
        let ballot = self.generate_ballot().max(floor + 1);

        self.catalog
            .save_proposal(&ProposalRecord {
                chunk_id: request.chunk_id.clone(),
                promised_ballot: ballot,
                accepted_ballot: existing.as_ref().map(|p| p.accepted_ballot).unwrap_or(0),
                accepted_value: existing.and_then(|p| p.accepted_value),
                phase: ProposalPhase::Prepare,
            })
            .await?;

        debug!(
            chunk_id = %request.chunk_id,
            ballot,
            candidates = candidates.len(),
            "Prepare: verifying presence on candidate nodes"
        );

        let checks = candidates.iter().map(|(node, probe_id, expected)| {
            let checker = self.checker.clone();
            let timeout = self.probe_timeout;
            async move {
                match checker.check(node, probe_id, timeout).await {
                    Some(hash) if hash == *expected => true,
                    Some(_) => {
                        warn!(node = %node, chunk_id = %probe_id, "Presence hash mismatch");
                        false
                    }
                    None => false,
                }
            }
        });
        let confirmations = join_all(checks).await;

        let confirmed: Vec<usize> = confirmations
            .into_iter()
            .enumerate()
            .filter_map(|(i, ok)| ok.then_some(i))
            .collect();

        // Erasure placements need every fragment; replicated needs a quorum.
        let required = match request.mode {
            RedundancyMode::Replicated => quorum(candidates.len()),
            RedundancyMode::Erasure => candidates.len(),
        };
        if confirmed.len() < required {
            warn!(
                chunk_id = %request.chunk_id,
                confirmed = confirmed.len(),
                required,
                "Quorum not reached; previously accepted value retained"
            );
            return Err(CoordinatorError::QuorumNotReached {
                confirmed: confirmed.len(),
                required,
            });
        }

        let committed_nodes: Vec<NodeUrl> = confirmed
            .iter()
            .map(|&i| candidates[i].0.clone())
            .collect();
        let committed_fragments: Vec<FragmentMeta> = match request.mode {
            RedundancyMode::Replicated => Vec::new(),
            RedundancyMode::Erasure => request.fragments.clone(),
        };

        self.catalog
            .save_proposal(&ProposalRecord {
                chunk_id: request.chunk_id.clone(),
                promised_ballot: ballot,
                accepted_ballot: ballot,
                accepted_value: Some(committed_nodes.clone()),
                phase: ProposalPhase::Accept,
            })
            .await?;

        self.catalog
            .commit_chunk(&CommittedPlacement {
                chunk_id: request.chunk_id.clone(),
                stream_id: request.stream_id,
                sequence: request.sequence,
                size_bytes: request.size_bytes,
                hash: request.hash,
                mode: request.mode,
                ballot,
                nodes: committed_nodes.clone(),
                fragments: committed_fragments,
            })
            .await?;

        info!(
            chunk_id = %request.chunk_id,
            ballot,
            nodes = committed_nodes.len(),
            mode = request.mode.as_str(),
            "Placement committed"
        );

        Ok(PlacementOutcome {
            chunk_id: request.chunk_id,
            ballot,
            committed_nodes,
            already_committed: false,
        })
    }
}
