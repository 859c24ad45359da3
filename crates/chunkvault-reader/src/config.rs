//! Reader Configuration
//!
//! Defaults match the deployment the system was tuned on; every knob can be
//! overridden from the environment in the reader binary:
//!
//! - `PROBE_INTERVAL` (seconds, default 3) / `PROBE_DEADLINE` (default 2)
//! - `DOWNLOAD_DEADLINE` (seconds, default 30)
//! - `MAX_CONCURRENT_DOWNLOADS` (default 4)
//! - `START_PLAYBACK_SEC` (default 10), `LOW_WATER_SEC` (default 15),
//!   `TARGET_BUFFER_SEC` (default 30)

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Cadence of the per-node latency probes.
    pub probe_interval: Duration,
    /// Probe cancellation deadline; expiry counts as a reliability failure.
    pub probe_deadline: Duration,
    /// Chunk download cancellation deadline.
    pub download_deadline: Duration,
    /// Concurrent chunk downloads.
    pub max_concurrent_downloads: usize,
    /// Buffered seconds required before playback starts.
    pub start_playback_sec: u64,
    /// Buffered seconds below which refilling takes priority.
    pub low_water_sec: u64,
    /// Soft upper bound for prefetch.
    pub target_sec: u64,
    /// Playout seconds per chunk.
    pub chunk_duration: Duration,
    /// Sliding window lengths.
    pub latency_window: usize,
    pub reliability_window: usize,
    pub bandwidth_window: usize,
    /// Bandwidth estimate (Mb/s) before any download has been measured.
    pub bandwidth_seed_mbps: f64,
    /// Attempts per replica before failing over.
    pub attempts_per_replica: u32,
    /// Base delay of the per-replica exponential backoff.
    pub backoff_base: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(3),
            probe_deadline: Duration::from_secs(2),
            download_deadline: Duration::from_secs(30),
            max_concurrent_downloads: 4,
            start_playback_sec: 10,
            low_water_sec: 15,
            target_sec: 30,
            chunk_duration: Duration::from_secs(10),
            latency_window: 10,
            reliability_window: 20,
            bandwidth_window: 10,
            bandwidth_seed_mbps: 50.0,
            attempts_per_replica: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ReaderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            probe_interval: Duration::from_secs(env_parse(
                "PROBE_INTERVAL",
                defaults.probe_interval.as_secs(),
            )),
            probe_deadline: Duration::from_secs(env_parse(
                "PROBE_DEADLINE",
                defaults.probe_deadline.as_secs(),
            )),
            download_deadline: Duration::from_secs(env_parse(
                "DOWNLOAD_DEADLINE",
                defaults.download_deadline.as_secs(),
            )),
            max_concurrent_downloads: env_parse(
                "MAX_CONCURRENT_DOWNLOADS",
                defaults.max_concurrent_downloads,
            ),
            start_playback_sec: env_parse("START_PLAYBACK_SEC", defaults.start_playback_sec),
            low_water_sec: env_parse("LOW_WATER_SEC", defaults.low_water_sec),
            target_sec: env_parse("TARGET_BUFFER_SEC", defaults.target_sec),
            ..defaults
        }
    }
}
