//! Redundancy-Mode Selection
//!
//! Per stream, the redundancy mode is chosen at first chunk commit and
//! frozen for the life of the stream:
//!
//! - Popularity above the hot threshold: **replicated**, R full copies,
//!   cheap reads for hot content.
//! - Otherwise: **erasure**, K data + M parity fragments across K+M nodes,
//!   ~44% less storage than triple replication at the defaults.
//!
//! A per-stream manual override, when set, supersedes the popularity test.
//! Already-committed chunks are never re-coded; the mode recorded on the
//! stream at first commit wins over everything.

use chunkvault_core::erasure::{DEFAULT_DATA_SHARDS, DEFAULT_PARITY_SHARDS};
use chunkvault_core::RedundancyMode;
use serde::{Deserialize, Serialize};

use crate::catalog::StreamRecord;

/// Popularity above which a stream is hot and gets full replication.
pub const DEFAULT_POPULARITY_THRESHOLD: u64 = 1000;

/// Full copies stored in replicated mode.
pub const REPLICATION_FACTOR: u32 = 3;

/// Disk usage fraction above which a node is excluded from placement.
pub const DISK_USAGE_WARN: f64 = 0.85;

/// Mode plus its parameters, as reported by the recommend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedundancyConfig {
    Replicated {
        replication_factor: u32,
    },
    Erasure {
        data_shards: u32,
        parity_shards: u32,
        total_shards: u32,
    },
}

impl RedundancyConfig {
    pub fn for_mode(mode: RedundancyMode) -> Self {
        match mode {
            RedundancyMode::Replicated => RedundancyConfig::Replicated {
                replication_factor: REPLICATION_FACTOR,
            },
            RedundancyMode::Erasure => RedundancyConfig::Erasure {
                data_shards: DEFAULT_DATA_SHARDS as u32,
                parity_shards: DEFAULT_PARITY_SHARDS as u32,
                total_shards: (DEFAULT_DATA_SHARDS + DEFAULT_PARITY_SHARDS) as u32,
            },
        }
    }

    /// Physical-to-logical storage ratio of this configuration.
    pub fn overhead_ratio(&self) -> f64 {
        match self {
            RedundancyConfig::Replicated { replication_factor } => *replication_factor as f64,
            RedundancyConfig::Erasure {
                data_shards,
                total_shards,
                ..
            } => *total_shards as f64 / *data_shards as f64,
        }
    }
}

/// Popularity-driven mode selection.
#[derive(Debug, Clone)]
pub struct RedundancyPolicy {
    popularity_threshold: u64,
}

impl RedundancyPolicy {
    pub fn new(popularity_threshold: u64) -> Self {
        Self {
            popularity_threshold,
        }
    }

    /// Decide the mode for a stream: the frozen mode wins, then the manual
    /// override, then the popularity test.
    pub fn select(&self, stream: &StreamRecord, popularity: u64) -> RedundancyMode {
        if let Some(frozen) = stream.redundancy_mode {
            return frozen;
        }
        if let Some(override_mode) = stream.redundancy_override {
            return override_mode;
        }
        if popularity > self.popularity_threshold {
            RedundancyMode::Replicated
        } else {
            RedundancyMode::Erasure
        }
    }

    /// True when the stream's mode is already frozen by a committed chunk.
    pub fn is_frozen(&self, stream: &StreamRecord) -> bool {
        stream.redundancy_mode.is_some()
    }

    /// Expected savings of erasure over replication at current parameters.
    pub fn erasure_savings(&self) -> f64 {
        let replication = RedundancyConfig::for_mode(RedundancyMode::Replicated).overhead_ratio();
        let erasure = RedundancyConfig::for_mode(RedundancyMode::Erasure).overhead_ratio();
        (replication - erasure) / replication
    }
}

impl Default for RedundancyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POPULARITY_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkvault_core::{StreamId, StreamStatus};

    fn stream(
        mode: Option<RedundancyMode>,
        override_mode: Option<RedundancyMode>,
    ) -> StreamRecord {
        StreamRecord {
            stream_id: StreamId::generate(),
            title: "t".into(),
            duration_sec: 60,
            total_chunks: 0,
            chunk_size_bytes: 2 * 1024 * 1024,
            chunk_duration_sec: 10,
            status: StreamStatus::Uploading,
            redundancy_mode: mode,
            redundancy_override: override_mode,
            created_at: 0,
        }
    }

    #[test]
    fn test_hot_stream_gets_replication() {
        let policy = RedundancyPolicy::default();
        let s = stream(None, None);
        assert_eq!(policy.select(&s, 1001), RedundancyMode::Replicated);
    }

    #[test]
    fn test_cold_stream_gets_erasure() {
        let policy = RedundancyPolicy::default();
        let s = stream(None, None);
        assert_eq!(policy.select(&s, 0), RedundancyMode::Erasure);
        // Boundary: exactly at the threshold stays erasure.
        assert_eq!(policy.select(&s, 1000), RedundancyMode::Erasure);
    }

    #[test]
    fn test_override_beats_popularity() {
        let policy = RedundancyPolicy::default();
        let s = stream(None, Some(RedundancyMode::Replicated));
        assert_eq!(policy.select(&s, 0), RedundancyMode::Replicated);
    }

    #[test]
    fn test_frozen_mode_beats_everything() {
        let policy = RedundancyPolicy::default();
        let s = stream(
            Some(RedundancyMode::Erasure),
            Some(RedundancyMode::Replicated),
        );
        assert_eq!(policy.select(&s, 1_000_000), RedundancyMode::Erasure);
        assert!(policy.is_frozen(&s));
    }

    #[test]
    fn test_erasure_savings_at_defaults() {
        let policy = RedundancyPolicy::default();
        // 1 - (5/3)/3 ~ 0.444
        assert!((policy.erasure_savings() - 0.4444).abs() < 0.001);
    }

    #[test]
    fn test_config_overhead_ratios() {
        assert_eq!(
            RedundancyConfig::for_mode(RedundancyMode::Replicated).overhead_ratio(),
            3.0
        );
        let erasure = RedundancyConfig::for_mode(RedundancyMode::Erasure).overhead_ratio();
        assert!((erasure - 5.0 / 3.0).abs() < 1e-9);
    }
}
