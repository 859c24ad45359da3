//! Read Session - Orchestrating Probes, Downloads, and Playout
//!
//! A session owns everything for one playback of one stream:
//!
//! - one prober task per candidate node, firing on the probe interval;
//! - up to the configured number of concurrent chunk downloads, scheduled
//!   lowest-missing-sequence first while the buffer is below target;
//! - a playout clock that emits chunks in strict sequence order once the
//!   start threshold is buffered.
//!
//! A chunk whose every replica fails becomes a playout gap: the session
//! logs it, records a stall, and continues with later chunks. A session
//! never aborts for a recoverable error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use chunkvault_core::{ManifestChunk, StreamManifest};

use crate::buffer::{BufferedChunk, PlaybackState, PlayoutBuffer, PlayoutEvent};
use crate::client::NodeClient;
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::probe::{NodeCondition, ProbeEngine};
use crate::scheduler::{ChunkScheduler, SchedulerStats};

/// What the session delivers to the playout consumer.
#[derive(Debug)]
pub enum SessionEvent {
    Chunk(BufferedChunk),
    /// A sequence skipped because every replica failed.
    Gap(u64),
}

/// End-of-session report.
#[derive(Debug)]
pub struct SessionSummary {
    pub stream_title: String,
    pub chunks_emitted: u64,
    pub gaps: u64,
    pub stalls: u64,
    /// Manifest receipt to playback start.
    pub startup_latency: Option<Duration>,
    pub scheduler: SchedulerStats,
    pub node_conditions: Vec<NodeCondition>,
}

/// One playback session over one manifest.
pub struct ReadSession {
    manifest: StreamManifest,
    probe: Arc<ProbeEngine>,
    scheduler: Arc<ChunkScheduler>,
    client: Arc<dyn NodeClient>,
    config: ReaderConfig,
}

impl ReadSession {
    pub fn new(
        manifest: StreamManifest,
        client: Arc<dyn NodeClient>,
        config: ReaderConfig,
    ) -> Self {
        let probe = Arc::new(ProbeEngine::new(config.clone()));
        let scheduler = Arc::new(ChunkScheduler::new(
            probe.clone(),
            client.clone(),
            config.clone(),
        ));
        Self {
            manifest,
            probe,
            scheduler,
            client,
            config,
        }
    }

    /// Direct access to the probe engine (stats, tests).
    pub fn probe_engine(&self) -> Arc<ProbeEngine> {
        self.probe.clone()
    }

    /// Run the session to completion, delivering ordered playout events on
    /// `output`. Returns the session summary.
    pub async fn run(self, output: mpsc::Sender<SessionEvent>) -> Result<SessionSummary> {
        let candidates = self.manifest.candidate_nodes();
        info!(
            stream_id = %self.manifest.stream_id,
            chunks = self.manifest.total_chunks,
            nodes = candidates.len(),
            "Session starting"
        );
        self.probe.register_nodes(&candidates).await;
        let prober_handles = self
            .probe
            .clone()
            .spawn_probers(candidates.clone(), self.client.clone());

        let chunk_map: HashMap<u64, ManifestChunk> = self
            .manifest
            .chunks
            .iter()
            .map(|c| (c.sequence, c.clone()))
            .collect();

        let buffer = Arc::new(Mutex::new(PlayoutBuffer::new(
            self.manifest.total_chunks,
            self.config.chunk_duration.as_secs().max(1),
            self.config.start_playback_sec,
            self.config.low_water_sec,
            self.config.target_sec,
        )));

        let started_at = Instant::now();
        let mut startup_latency: Option<Duration> = None;
        let mut downloads: JoinSet<(u64, Result<bytes::Bytes>)> = JoinSet::new();
        let mut in_flight: HashSet<u64> = HashSet::new();
        let mut playout: Option<tokio::time::Interval> = None;
        let mut chunks_emitted = 0u64;
        let mut gaps = 0u64;

        loop {
            // Schedule the lowest missing sequences while below target.
            {
                let buf = buffer.lock().await;
                if buf.prefetch_allowed() {
                    for seq in buf.wanted_sequences(self.config.max_concurrent_downloads * 2) {
                        if in_flight.len() >= self.config.max_concurrent_downloads {
                            break;
                        }
                        if in_flight.contains(&seq) {
                            continue;
                        }
                        let Some(chunk) = chunk_map.get(&seq).cloned() else {
                            continue;
                        };
                        let scheduler = self.scheduler.clone();
                        in_flight.insert(seq);
                        downloads.spawn(async move {
                            let result = scheduler.download_chunk(&chunk).await;
                            (seq, result)
                        });
                    }
                }
            }

            // State transitions and termination.
            {
                let mut buf = buffer.lock().await;
                if buf.state() == PlaybackState::Buffering {
                    let nothing_left = in_flight.is_empty() && buf.wanted_sequences(1).is_empty();
                    if nothing_left {
                        buf.begin_playback();
                    }
                }
                if playout.is_none() && buf.state() != PlaybackState::Buffering {
                    startup_latency = Some(started_at.elapsed());
                    info!(
                        startup_ms = started_at.elapsed().as_millis() as u64,
                        "Playback starting"
                    );
                    let mut interval = tokio::time::interval(self.config.chunk_duration);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    playout = Some(interval);
                }
                if buf.state() == PlaybackState::Finished && in_flight.is_empty() {
                    break;
                }
            }

            tokio::select! {
                joined = downloads.join_next(), if !in_flight.is_empty() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((seq, Ok(data))) => {
                            in_flight.remove(&seq);
                            let mut buf = buffer.lock().await;
                            if let Some(chunk) = chunk_map.get(&seq) {
                                buf.insert(chunk.chunk_id.clone(), seq, data);
                            }
                        }
                        Ok((seq, Err(e))) => {
                            in_flight.remove(&seq);
                            warn!(sequence = seq, error = %e, "Chunk download failed on every replica");
                            buffer.lock().await.mark_unavailable(seq);
                        }
                        Err(e) => {
                            // A panicked task loses its sequence number;
                            // once the set drains, anything still marked
                            // in flight gets rescheduled.
                            warn!(error = %e, "Download task aborted");
                            if downloads.is_empty() {
                                in_flight.clear();
                            }
                        }
                    }
                }
                _ = Self::playout_tick(&mut playout) => {
                    let event = buffer.lock().await.advance();
                    match event {
                        PlayoutEvent::Chunk(chunk) => {
                            debug!(sequence = chunk.sequence, "Emitting chunk");
                            chunks_emitted += 1;
                            if output.send(SessionEvent::Chunk(chunk)).await.is_err() {
                                warn!("Playout consumer dropped; ending session");
                                break;
                            }
                        }
                        PlayoutEvent::Gap(seq) => {
                            gaps += 1;
                            if output.send(SessionEvent::Gap(seq)).await.is_err() {
                                break;
                            }
                        }
                        PlayoutEvent::Stall => {
                            debug!("Playout stalled waiting for next chunk");
                        }
                        PlayoutEvent::Finished => {}
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }

        for handle in prober_handles {
            handle.abort();
        }

        let buf = buffer.lock().await;
        let summary = SessionSummary {
            stream_title: self.manifest.title.clone(),
            chunks_emitted,
            gaps,
            stalls: buf.stall_count(),
            startup_latency,
            scheduler: self.scheduler.stats().await,
            node_conditions: self.probe.conditions().await,
        };
        info!(
            chunks = summary.chunks_emitted,
            stalls = summary.stalls,
            gaps = summary.gaps,
            "Session finished"
        );
        Ok(summary)
    }

    async fn playout_tick(playout: &mut Option<tokio::time::Interval>) {
        match playout {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
