//! Stream Manifests
//!
//! The manifest is the self-contained listing the coordinator dispenses to
//! readers: every chunk of a stream in sequence order, each with its size,
//! content hash, and replica or fragment locations. Once a stream is active
//! the manifest is immutable for the life of the stream.
//!
//! ## Location Encoding
//!
//! Each chunk carries a [`ChunkLocations`] enum tagged by `redundancy_mode`:
//!
//! ```json
//! { "redundancy_mode": "replicated", "replicas": ["http://node-1:8081", ...] }
//! { "redundancy_mode": "erasure", "fragments": [{ "index": 0, ... }, ...] }
//! ```
//!
//! A replicated entry can never carry fragments and vice versa; the variant
//! is part of the type, not an optional field.

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;
use crate::id::{ChunkId, NodeUrl, StreamId};

/// Lifecycle status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Uploading,
    Active,
    Deleted,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Uploading => "uploading",
            StreamStatus::Active => "active",
            StreamStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uploading" => Some(StreamStatus::Uploading),
            "active" => Some(StreamStatus::Active),
            "deleted" => Some(StreamStatus::Deleted),
            _ => None,
        }
    }
}

/// Redundancy mode of a stream, chosen at first chunk commit and frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyMode {
    Replicated,
    Erasure,
}

impl RedundancyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedundancyMode::Replicated => "replicated",
            RedundancyMode::Erasure => "erasure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "replicated" => Some(RedundancyMode::Replicated),
            "erasure" => Some(RedundancyMode::Erasure),
            _ => None,
        }
    }
}

/// Location of one erasure fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentLocation {
    /// Fragment index in `[0, K+M)`.
    pub index: u32,
    pub node_url: NodeUrl,
    pub size_bytes: u64,
    pub hash: ContentHash,
}

/// Where the bytes of a chunk live, by redundancy mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "redundancy_mode", rename_all = "snake_case")]
pub enum ChunkLocations {
    Replicated { replicas: Vec<NodeUrl> },
    Erasure { fragments: Vec<FragmentLocation> },
}

impl ChunkLocations {
    pub fn mode(&self) -> RedundancyMode {
        match self {
            ChunkLocations::Replicated { .. } => RedundancyMode::Replicated,
            ChunkLocations::Erasure { .. } => RedundancyMode::Erasure,
        }
    }

    /// Every node URL referenced by this entry, for probe bootstrapping.
    pub fn node_urls(&self) -> Vec<&NodeUrl> {
        match self {
            ChunkLocations::Replicated { replicas } => replicas.iter().collect(),
            ChunkLocations::Erasure { fragments } => {
                fragments.iter().map(|f| &f.node_url).collect()
            }
        }
    }
}

/// One chunk entry in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub chunk_id: ChunkId,
    pub sequence: u64,
    pub size_bytes: u64,
    pub hash: ContentHash,
    #[serde(flatten)]
    pub locations: ChunkLocations,
}

/// Self-contained per-stream manifest dispensed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamManifest {
    pub stream_id: StreamId,
    pub title: String,
    pub duration_sec: u64,
    pub total_chunks: u64,
    pub chunk_duration_sec: u64,
    pub chunk_size_bytes: u64,
    pub status: StreamStatus,
    /// Chunks in strict sequence order.
    pub chunks: Vec<ManifestChunk>,
}

impl StreamManifest {
    /// All distinct node URLs across every chunk, in first-seen order.
    /// This is the reader's probe candidate set.
    pub fn candidate_nodes(&self) -> Vec<NodeUrl> {
        let mut seen = Vec::new();
        for chunk in &self.chunks {
            for url in chunk.locations.node_urls() {
                if !seen.contains(url) {
                    seen.push(url.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicated_chunk(seq: u64, urls: &[&str]) -> ManifestChunk {
        ManifestChunk {
            chunk_id: ChunkId::parse(format!("c_{seq}")).unwrap(),
            sequence: seq,
            size_bytes: 100,
            hash: ContentHash::of(b"data"),
            locations: ChunkLocations::Replicated {
                replicas: urls.iter().map(|u| NodeUrl::new(*u)).collect(),
            },
        }
    }

    #[test]
    fn test_locations_serde_replicated() {
        let chunk = replicated_chunk(0, &["http://a:1", "http://b:1"]);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["redundancy_mode"], "replicated");
        assert_eq!(json["replicas"].as_array().unwrap().len(), 2);
        assert!(json.get("fragments").is_none());
        let back: ManifestChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_locations_serde_erasure() {
        let chunk = ManifestChunk {
            chunk_id: ChunkId::parse("c_0").unwrap(),
            sequence: 0,
            size_bytes: 100,
            hash: ContentHash::of(b"data"),
            locations: ChunkLocations::Erasure {
                fragments: vec![FragmentLocation {
                    index: 0,
                    node_url: NodeUrl::new("http://a:1"),
                    size_bytes: 34,
                    hash: ContentHash::of(b"frag"),
                }],
            },
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["redundancy_mode"], "erasure");
        assert_eq!(json["fragments"][0]["index"], 0);
        let back: ManifestChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_candidate_nodes_deduplicates() {
        let manifest = StreamManifest {
            stream_id: StreamId::generate(),
            title: "t".into(),
            duration_sec: 30,
            total_chunks: 3,
            chunk_duration_sec: 10,
            chunk_size_bytes: 100,
            status: StreamStatus::Active,
            chunks: vec![
                replicated_chunk(0, &["http://a:1", "http://b:1"]),
                replicated_chunk(1, &["http://b:1", "http://c:1"]),
                replicated_chunk(2, &["http://a:1"]),
            ],
        };
        let nodes = manifest.candidate_nodes();
        assert_eq!(
            nodes,
            vec![
                NodeUrl::new("http://a:1"),
                NodeUrl::new("http://b:1"),
                NodeUrl::new("http://c:1"),
            ]
        );
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in [
            StreamStatus::Uploading,
            StreamStatus::Active,
            StreamStatus::Deleted,
        ] {
            assert_eq!(StreamStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(StreamStatus::parse("bogus"), None);
    }

    #[test]
    fn test_mode_parse_roundtrip() {
        for m in [RedundancyMode::Replicated, RedundancyMode::Erasure] {
            assert_eq!(RedundancyMode::parse(m.as_str()), Some(m));
        }
        assert_eq!(RedundancyMode::parse("replication"), None);
    }
}
