//! Identity Newtypes
//!
//! Every entity in ChunkVault gets its own identity type so the type system
//! prevents accidentally passing a node id where a chunk id is expected.
//!
//! ## Identity Rules
//!
//! - **ChunkId**: 1-64 bytes of `[A-Za-z0-9_-]`, caller-assigned. Chunk ids
//!   for stream data are derived as `<stream>_<sequence>` and fragment ids
//!   as `<chunk>-frag-<index>`, both of which stay inside the allowed
//!   alphabet and length limit.
//! - **StreamId**: opaque 128-bit id, rendered as a dashless UUID so derived
//!   chunk ids remain valid.
//! - **NodeId / NodeUrl**: opaque strings. A `NodeUrl` is carried verbatim
//!   through manifests and never parsed to derive routing.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Maximum length of a chunk id in bytes.
pub const CHUNK_ID_MAX_LEN: usize = 64;

/// Identifier of a stored chunk (alphanumeric, underscore, hyphen; 1-64 bytes).
/// Deserialization validates, so a malformed id is rejected at the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ChunkId(String);

impl TryFrom<String> for ChunkId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl ChunkId {
    /// Validate and wrap a raw chunk id.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > CHUNK_ID_MAX_LEN {
            return Err(CoreError::InvalidChunkId(raw));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(CoreError::InvalidChunkId(raw));
        }
        Ok(Self(raw))
    }

    /// Derive the chunk id for a stream's sequence number.
    pub fn for_sequence(stream: &StreamId, sequence: u64) -> Self {
        Self(format!("{}_{}", stream.as_simple(), sequence))
    }

    /// Derive the fragment id for an erasure-coded chunk.
    pub fn fragment(&self, index: u32) -> Self {
        Self(format!("{}-frag-{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque 128-bit stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Generate a fresh random stream id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from either the hyphenated or the simple UUID rendering.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| CoreError::InvalidStreamId(raw.to_string()))
    }

    /// Dashless rendering, used when deriving chunk ids.
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a storage node process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical base URL of a storage node. Treated as opaque identity; the
/// manifest carries it verbatim and nothing ever parses it for routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeUrl(String);

impl NodeUrl {
    pub fn new(raw: impl Into<String>) -> Self {
        let mut raw = raw.into();
        while raw.ends_with('/') {
            raw.pop();
        }
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // ChunkId validation
    // ---------------------------------------------------------------

    #[test]
    fn test_chunk_id_accepts_allowed_alphabet() {
        assert!(ChunkId::parse("abc_DEF-123").is_ok());
    }

    #[test]
    fn test_chunk_id_rejects_empty() {
        assert!(ChunkId::parse("").is_err());
    }

    #[test]
    fn test_chunk_id_accepts_exactly_64_chars() {
        let id = "a".repeat(64);
        assert!(ChunkId::parse(id).is_ok());
    }

    #[test]
    fn test_chunk_id_rejects_65_chars() {
        let id = "a".repeat(65);
        assert!(ChunkId::parse(id).is_err());
    }

    #[test]
    fn test_chunk_id_rejects_slash() {
        assert!(ChunkId::parse("../etc/passwd").is_err());
    }

    #[test]
    fn test_chunk_id_rejects_whitespace() {
        assert!(ChunkId::parse("chunk 1").is_err());
    }

    #[test]
    fn test_chunk_id_rejects_unicode() {
        assert!(ChunkId::parse("chunk\u{00e9}").is_err());
    }

    // ---------------------------------------------------------------
    // Derived ids
    // ---------------------------------------------------------------

    #[test]
    fn test_for_sequence_is_valid_chunk_id() {
        let stream = StreamId::generate();
        let id = ChunkId::for_sequence(&stream, 42);
        assert!(ChunkId::parse(id.as_str()).is_ok());
        assert!(id.as_str().ends_with("_42"));
    }

    #[test]
    fn test_fragment_id_is_valid_chunk_id() {
        let stream = StreamId::generate();
        let chunk = ChunkId::for_sequence(&stream, 0);
        let frag = chunk.fragment(4);
        assert!(ChunkId::parse(frag.as_str()).is_ok());
        assert!(frag.as_str().ends_with("-frag-4"));
    }

    #[test]
    fn test_derived_ids_stay_within_length_limit() {
        let stream = StreamId::generate();
        // Worst case: large sequence number plus fragment suffix.
        let chunk = ChunkId::for_sequence(&stream, u64::MAX / 1000);
        let frag = chunk.fragment(4);
        assert!(frag.as_str().len() <= CHUNK_ID_MAX_LEN);
    }

    // ---------------------------------------------------------------
    // StreamId
    // ---------------------------------------------------------------

    #[test]
    fn test_stream_id_roundtrip() {
        let id = StreamId::generate();
        let parsed = StreamId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_stream_id_parses_simple_form() {
        let id = StreamId::generate();
        let parsed = StreamId::parse(&id.as_simple()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_stream_id_rejects_garbage() {
        assert!(StreamId::parse("not-a-uuid").is_err());
    }

    // ---------------------------------------------------------------
    // NodeUrl
    // ---------------------------------------------------------------

    #[test]
    fn test_node_url_strips_trailing_slash() {
        let url = NodeUrl::new("http://node-1:8081/");
        assert_eq!(url.as_str(), "http://node-1:8081");
    }

    #[test]
    fn test_node_url_serde_transparent() {
        let url = NodeUrl::new("http://node-1:8081");
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"http://node-1:8081\"");
    }
}
