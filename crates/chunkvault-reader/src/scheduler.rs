//! Chunk Scheduler - Scored Selection, Parallel Downloads, Failover
//!
//! For each chunk the scheduler scores the replica candidates, picks the
//! best node that is not demoted, and downloads with bounded retries:
//!
//! - Transport errors and timeouts retry on the same node with exponential
//!   backoff, then fail over to the next-best replica.
//! - Not-found fails over immediately; retrying the same node is wasted.
//! - Hash mismatches count against the node's reliability and fail over.
//! - When every replica is exhausted the chunk fails; the session treats
//!   that as a playout gap, never an abort.
//!
//! Selection is stateless across chunks; there is no sticky assignment.
//! A concurrency semaphore caps simultaneous chunk downloads.
//!
//! Erasure-mode chunks fetch their K best-scoring fragments in parallel,
//! verify each fragment hash, reconstruct locally, and verify the result
//! against the chunk's top-level hash, pulling extra fragments as needed.

use bytes::Bytes;
use futures::future::join_all;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use chunkvault_core::erasure::DEFAULT_PARITY_SHARDS;
use chunkvault_core::{
    ChunkId, ChunkLocations, ErasureCodec, FragmentLocation, ManifestChunk, NodeUrl,
};

use crate::client::NodeClient;
use crate::config::ReaderConfig;
use crate::error::{ReaderError, Result};
use crate::probe::ProbeEngine;

/// Session-level download statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub total_downloads: u64,
    pub failed_chunks: u64,
    pub failovers: u64,
    pub downloads_per_node: HashMap<NodeUrl, u64>,
}

/// Schedules chunk downloads across replica nodes.
pub struct ChunkScheduler {
    probe: Arc<ProbeEngine>,
    client: Arc<dyn NodeClient>,
    semaphore: Arc<Semaphore>,
    config: ReaderConfig,
    stats: Mutex<SchedulerStats>,
}

impl ChunkScheduler {
    pub fn new(probe: Arc<ProbeEngine>, client: Arc<dyn NodeClient>, config: ReaderConfig) -> Self {
        Self {
            probe,
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            config,
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.lock().await.clone()
    }

    /// Pick the best-scoring candidate, preferring nodes that are neither
    /// dead nor mid-download; ties go to the least-recently selected.
    pub async fn select_node(&self, candidates: &[NodeUrl]) -> Option<NodeUrl> {
        if candidates.is_empty() {
            return None;
        }
        let view = self.probe.candidate_view(candidates).await;
        let eligible: Vec<_> = view.iter().filter(|entry| !entry.3).collect();
        let pool: Vec<_> = if eligible.is_empty() {
            view.iter().collect()
        } else {
            eligible
        };

        let best = pool.iter().max_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| b.2.cmp(&a.2)) // fewer selections wins the tie
        })?;
        let node = best.0.clone();
        self.probe.record_selection(&node).await;
        Some(node)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as f64 * 2f64.powi(attempt as i32);
        let jitter = 0.75 + (rand::thread_rng().gen::<f64>() * 0.5);
        Duration::from_millis((base * jitter) as u64)
    }

    /// Download one chunk, whatever its redundancy mode.
    pub async fn download_chunk(&self, chunk: &ManifestChunk) -> Result<Bytes> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ReaderError::Transport("scheduler shut down".to_string()))?;

        let result = match &chunk.locations {
            ChunkLocations::Replicated { replicas } => {
                self.download_replicated(chunk, replicas).await
            }
            ChunkLocations::Erasure { fragments } => self.download_erasure(chunk, fragments).await,
        };

        let mut stats = self.stats.lock().await;
        match &result {
            Ok(_) => stats.total_downloads += 1,
            Err(_) => stats.failed_chunks += 1,
        }
        result
    }

    /// Fetch one body from one node, feeding the bandwidth and reliability
    /// windows.
    async fn fetch_once(&self, node: &NodeUrl, id: &ChunkId) -> Result<Bytes> {
        self.probe.begin_download(node).await;
        let started = Instant::now();
        let result = self
            .client
            .fetch_chunk(node.as_str(), id, self.config.download_deadline)
            .await;
        self.probe.end_download(node).await;

        match &result {
            Ok(bytes) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    let mbps = (bytes.len() as f64 * 8.0) / (elapsed * 1_000_000.0);
                    self.probe.record_bandwidth(node, mbps).await;
                }
                self.probe.record_download_result(node, true).await;
            }
            Err(_) => {
                self.probe.record_download_result(node, false).await;
            }
        }
        result
    }

    async fn download_replicated(
        &self,
        chunk: &ManifestChunk,
        replicas: &[NodeUrl],
    ) -> Result<Bytes> {
        let mut attempted: HashSet<NodeUrl> = HashSet::new();

        while attempted.len() < replicas.len() {
            let remaining: Vec<NodeUrl> = replicas
                .iter()
                .filter(|n| !attempted.contains(*n))
                .cloned()
                .collect();
            let Some(node) = self.select_node(&remaining).await else {
                break;
            };
            attempted.insert(node.clone());

            for attempt in 0..self.config.attempts_per_replica {
                match self.fetch_once(&node, &chunk.chunk_id).await {
                    Ok(bytes) => {
                        if chunk.hash.verify(&bytes) {
                            debug!(
                                chunk_id = %chunk.chunk_id,
                                node = %node,
                                size = bytes.len(),
                                "Chunk downloaded"
                            );
                            let mut stats = self.stats.lock().await;
                            *stats.downloads_per_node.entry(node.clone()).or_insert(0) += 1;
                            return Ok(bytes);
                        }
                        // Hash mismatch: count it against the node and fail
                        // over; the same node would serve the same bytes.
                        warn!(chunk_id = %chunk.chunk_id, node = %node, "Downloaded bytes fail hash check");
                        self.probe.record_download_result(&node, false).await;
                        break;
                    }
                    Err(e) if e.retryable_same_node() => {
                        warn!(
                            chunk_id = %chunk.chunk_id,
                            node = %node,
                            attempt = attempt + 1,
                            error = %e,
                            "Download attempt failed"
                        );
                        if attempt + 1 < self.config.attempts_per_replica {
                            tokio::time::sleep(self.backoff(attempt)).await;
                        }
                    }
                    Err(e) => {
                        // Not-found and friends: this node will not improve.
                        debug!(chunk_id = %chunk.chunk_id, node = %node, error = %e, "Failing over");
                        break;
                    }
                }
            }

            self.stats.lock().await.failovers += 1;
            info!(chunk_id = %chunk.chunk_id, node = %node, "Failing over to next replica");
        }

        Err(ReaderError::AllReplicasExhausted(chunk.chunk_id.clone()))
    }

    /// Order fragment locations best-node-first.
    async fn rank_fragments(&self, fragments: &[FragmentLocation]) -> Vec<FragmentLocation> {
        let urls: Vec<NodeUrl> = fragments.iter().map(|f| f.node_url.clone()).collect();
        let view = self.probe.candidate_view(&urls).await;
        let mut indexed: Vec<(usize, f64, bool)> = view
            .iter()
            .enumerate()
            .map(|(i, (_, score, _, demoted))| (i, *score, *demoted))
            .collect();
        // Healthy nodes first, then by score.
        indexed.sort_by(|a, b| a.2.cmp(&b.2).then(b.1.total_cmp(&a.1)));
        indexed
            .into_iter()
            .map(|(i, _, _)| fragments[i].clone())
            .collect()
    }

    async fn download_erasure(
        &self,
        chunk: &ManifestChunk,
        fragments: &[FragmentLocation],
    ) -> Result<Bytes> {
        let total = fragments.len();
        if total <= DEFAULT_PARITY_SHARDS {
            return Err(ReaderError::InsufficientFragments(chunk.chunk_id.clone()));
        }
        let data_shards = total - DEFAULT_PARITY_SHARDS;
        let codec = ErasureCodec::new(data_shards, DEFAULT_PARITY_SHARDS)?;

        let ranked = self.rank_fragments(fragments).await;
        let mut queue = ranked.into_iter();
        let mut collected: HashMap<u32, Vec<u8>> = HashMap::new();

        // Fetch in waves of however many fragments are still needed; every
        // fetched fragment is verified against its own hash before counting.
        while collected.len() < data_shards {
            let needed = data_shards - collected.len();
            let wave: Vec<FragmentLocation> = queue.by_ref().take(needed).collect();
            if wave.is_empty() {
                warn!(
                    chunk_id = %chunk.chunk_id,
                    collected = collected.len(),
                    needed = data_shards,
                    "Fragment candidates exhausted"
                );
                return Err(ReaderError::InsufficientFragments(chunk.chunk_id.clone()));
            }

            let fetches = wave.iter().map(|frag| {
                let fragment_id = chunk.chunk_id.fragment(frag.index);
                async move {
                    let result = self.fetch_once(&frag.node_url, &fragment_id).await;
                    (frag.clone(), result)
                }
            });
            for (frag, result) in join_all(fetches).await {
                match result {
                    Ok(bytes) if frag.hash.verify(&bytes) => {
                        collected.insert(frag.index, bytes.to_vec());
                    }
                    Ok(_) => {
                        warn!(
                            chunk_id = %chunk.chunk_id,
                            fragment = frag.index,
                            node = %frag.node_url,
                            "Fragment failed hash verification"
                        );
                        self.probe.record_download_result(&frag.node_url, false).await;
                    }
                    Err(e) => {
                        debug!(
                            chunk_id = %chunk.chunk_id,
                            fragment = frag.index,
                            node = %frag.node_url,
                            error = %e,
                            "Fragment fetch failed"
                        );
                    }
                }
            }
        }

        let slots: Vec<Option<Vec<u8>>> = (0..total as u32)
            .map(|i| collected.remove(&i))
            .collect();
        let rebuilt = codec.reconstruct(slots, chunk.size_bytes as usize)?;

        if !chunk.hash.verify(&rebuilt) {
            warn!(chunk_id = %chunk.chunk_id, "Reconstructed bytes fail top-level hash check");
            return Err(ReaderError::IntegrityMismatch(chunk.chunk_id.clone()));
        }

        info!(
            chunk_id = %chunk.chunk_id,
            fragments = data_shards,
            size = rebuilt.len(),
            "Chunk reconstructed from fragments"
        );
        Ok(Bytes::from(rebuilt))
    }
}
