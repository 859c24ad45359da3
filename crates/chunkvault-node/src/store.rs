//! Chunk Store - Put/Get/Head/Delete Semantics
//!
//! `ChunkStore` composes the append-only superblock files and the in-memory
//! index into the node's storage engine:
//!
//! - **put** validates the id and body, is idempotent on an existing id,
//!   verifies any caller-supplied checksum, refuses writes at critical disk
//!   usage, appends + fsyncs, and only then publishes the index entry.
//! - **get** looks up under the read lock, reads the exact recorded byte
//!   range lock-free, and re-hashes the bytes before returning them.
//! - **head** answers from the index alone.
//! - **delete** removes the index entry only and refuses while a put holds
//!   the writer lock.
//!
//! Disk usage is tracked as stored-bytes over configured capacity and cached
//! in an atomic, so the probe path never touches the filesystem.

use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use chunkvault_core::{ChunkId, ContentHash, CHUNK_SIZE_BYTES};

use crate::error::{NodeError, Result};
use crate::index::{ChunkEntry, ChunkIndex};
use crate::superblock::SuperblockStore;

/// Disk usage fraction at which health degrades to warning.
pub const DISK_USAGE_WARN: f64 = 0.85;

/// Disk usage fraction at which writes are refused.
pub const DISK_USAGE_CRIT: f64 = 0.95;

/// Failed snapshot saves above which health becomes critical.
const FAILED_SAVES_CRIT: u64 = 5;

/// Derived node health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
        }
    }
}

/// Result of a put.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub hash: ContentHash,
    pub size: u64,
    pub superblock: u64,
    /// False when the id already existed and the call was a no-op.
    pub created: bool,
}

/// Point-in-time view of the node for probes and health reports.
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub chunk_count: usize,
    pub disk_usage: f64,
    pub uptime_sec: u64,
    pub state: HealthState,
}

/// The storage engine of one node.
pub struct ChunkStore {
    index: ChunkIndex,
    superblocks: SuperblockStore,
    stored_bytes: AtomicU64,
    capacity_bytes: u64,
    started_at: Instant,
}

impl ChunkStore {
    /// Open the store under `data_dir`: load the index snapshot, scan the
    /// superblock directory, and account existing bytes against capacity.
    pub async fn open(data_dir: &Path, max_superblock_size: u64, capacity_bytes: u64) -> Result<Self> {
        let index = ChunkIndex::load(data_dir).await?;
        let superblocks = SuperblockStore::open(data_dir, max_superblock_size).await?;
        let stored = superblocks.total_bytes().await?;
        info!(
            chunks = index.len().await,
            stored_bytes = stored,
            capacity_bytes,
            "Chunk store opened"
        );
        Ok(Self {
            index,
            superblocks,
            stored_bytes: AtomicU64::new(stored),
            capacity_bytes,
            started_at: Instant::now(),
        })
    }

    /// Store a chunk. Idempotent: a put of an id that already exists returns
    /// the stored hash without touching disk; if the caller supplied an
    /// expected hash that disagrees with the stored one, the put fails with
    /// an integrity mismatch instead.
    pub async fn put(
        &self,
        raw_id: &str,
        data: &[u8],
        expected_hash: Option<ContentHash>,
    ) -> Result<PutOutcome> {
        let id =
            ChunkId::parse(raw_id).map_err(|_| NodeError::InvalidChunkId(raw_id.to_string()))?;

        if data.is_empty() {
            return Err(NodeError::EmptyChunk);
        }
        if data.len() > CHUNK_SIZE_BYTES {
            return Err(NodeError::ChunkTooLarge {
                size: data.len(),
                limit: CHUNK_SIZE_BYTES,
            });
        }

        if let Some(existing) = self.index.get(&id).await {
            if let Some(expected) = &expected_hash {
                if *expected != existing.hash {
                    return Err(NodeError::IntegrityMismatch {
                        expected: expected.to_string(),
                        computed: existing.hash.to_string(),
                    });
                }
            }
            return Ok(PutOutcome {
                hash: existing.hash,
                size: existing.size,
                superblock: existing.superblock,
                created: false,
            });
        }

        let hash = ContentHash::of(data);
        if let Some(expected) = &expected_hash {
            if *expected != hash {
                return Err(NodeError::IntegrityMismatch {
                    expected: expected.to_string(),
                    computed: hash.to_string(),
                });
            }
        }

        let usage = self.disk_usage();
        if usage >= DISK_USAGE_CRIT {
            return Err(NodeError::CapacityExhausted { usage });
        }

        let location = self.superblocks.append(data).await?;
        self.stored_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let entry = ChunkEntry {
            superblock: location.superblock,
            offset: location.offset,
            size: data.len() as u64,
            hash: hash.clone(),
            stored_at: chrono::Utc::now().timestamp_millis(),
        };
        self.index.insert(id.clone(), entry).await;

        // Snapshot persistence is best effort; the failure counter feeds health.
        if let Err(e) = self.index.persist().await {
            warn!(chunk_id = %id, error = %e, "Index snapshot lagging after put");
        }

        info!(
            chunk_id = %id,
            size = data.len(),
            superblock = location.superblock,
            "Stored chunk"
        );

        Ok(PutOutcome {
            hash,
            size: data.len() as u64,
            superblock: location.superblock,
            created: true,
        })
    }

    /// Read a chunk back, re-verifying its content hash.
    pub async fn get(&self, raw_id: &str) -> Result<(Bytes, ChunkEntry)> {
        let id =
            ChunkId::parse(raw_id).map_err(|_| NodeError::InvalidChunkId(raw_id.to_string()))?;
        let entry = self.index.get(&id).await.ok_or(NodeError::NotFound(id.clone()))?;

        let data = self
            .superblocks
            .read(entry.superblock, entry.offset, entry.size)
            .await?;

        if !entry.hash.verify(&data) {
            warn!(chunk_id = %id, "Stored bytes fail hash verification");
            return Err(NodeError::CorruptionDetected(format!(
                "hash mismatch for chunk {id}"
            )));
        }
        Ok((Bytes::from(data), entry))
    }

    /// Index-only lookup: size, hash, and superblock ordinal.
    pub async fn head(&self, raw_id: &str) -> Result<ChunkEntry> {
        let id =
            ChunkId::parse(raw_id).map_err(|_| NodeError::InvalidChunkId(raw_id.to_string()))?;
        self.index.get(&id).await.ok_or(NodeError::NotFound(id))
    }

    /// Remove the index entry. Succeeds whether or not the id existed;
    /// refuses while a put holds the writer lock. The superblock bytes are
    /// left in place.
    pub async fn delete(&self, raw_id: &str) -> Result<bool> {
        let id =
            ChunkId::parse(raw_id).map_err(|_| NodeError::InvalidChunkId(raw_id.to_string()))?;

        let guard = self
            .superblocks
            .try_writer()
            .ok_or_else(|| NodeError::WriteInProgress(id.clone()))?;
        let existed = self.index.remove(&id).await;
        drop(guard);

        if existed {
            if let Err(e) = self.index.persist().await {
                warn!(chunk_id = %id, error = %e, "Index snapshot lagging after delete");
            }
            info!(chunk_id = %id, "Deleted chunk from index");
        }
        Ok(existed)
    }

    /// Current disk usage fraction in `[0, 1]`, served from a cached atomic.
    pub fn disk_usage(&self) -> f64 {
        let stored = self.stored_bytes.load(Ordering::Relaxed) as f64;
        (stored / self.capacity_bytes as f64).min(1.0)
    }

    pub async fn chunk_count(&self) -> usize {
        self.index.len().await
    }

    /// Flush the index snapshot, used on graceful shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.index.persist().await
    }

    /// Snapshot of the health-relevant counters.
    pub async fn stats(&self) -> NodeStats {
        let usage = self.disk_usage();
        let failed = self.index.failed_saves();
        let state = if usage >= DISK_USAGE_CRIT || failed > FAILED_SAVES_CRIT {
            HealthState::Critical
        } else if usage >= DISK_USAGE_WARN || failed > 0 {
            HealthState::Warning
        } else {
            HealthState::Healthy
        };
        NodeStats {
            chunk_count: self.index.len().await,
            disk_usage: usage,
            uptime_sec: self.started_at.elapsed().as_secs(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_CAPACITY: u64 = 1024 * 1024;

    async fn open_store() -> (ChunkStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), 1024 * 1024, TEST_CAPACITY)
            .await
            .unwrap();
        (store, dir)
    }

    // ---------------------------------------------------------------
    // Put validation
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_rejects_invalid_id() {
        let (store, _dir) = open_store().await;
        let err = store.put("bad id!", b"data", None).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidChunkId(_)));
    }

    #[tokio::test]
    async fn test_put_rejects_empty_body() {
        let (store, _dir) = open_store().await;
        let err = store.put("c1", b"", None).await.unwrap_err();
        assert!(matches!(err, NodeError::EmptyChunk));
    }

    #[tokio::test]
    async fn test_put_rejects_oversize_body() {
        let (store, _dir) = open_store().await;
        let body = vec![0u8; CHUNK_SIZE_BYTES + 1];
        let err = store.put("c1", &body, None).await.unwrap_err();
        assert!(matches!(err, NodeError::ChunkTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_put_accepts_body_at_exact_ceiling() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), 4 * 1024 * 1024, 64 * 1024 * 1024)
            .await
            .unwrap();
        let body = vec![0xABu8; CHUNK_SIZE_BYTES];
        let outcome = store.put("c1", &body, None).await.unwrap();
        assert!(outcome.created);
        let (bytes, _) = store.get("c1").await.unwrap();
        assert_eq!(bytes.len(), CHUNK_SIZE_BYTES);
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_expected_hash() {
        let (store, _dir) = open_store().await;
        let wrong = ContentHash::of(b"other bytes");
        let err = store.put("c1", b"data", Some(wrong)).await.unwrap_err();
        assert!(matches!(err, NodeError::IntegrityMismatch { .. }));
        // Nothing published on failure.
        assert!(matches!(
            store.get("c1").await.unwrap_err(),
            NodeError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_put_accepts_matching_expected_hash() {
        let (store, _dir) = open_store().await;
        let hash = ContentHash::of(b"data");
        let outcome = store.put("c1", b"data", Some(hash.clone())).await.unwrap();
        assert_eq!(outcome.hash, hash);
        assert!(outcome.created);
    }

    // ---------------------------------------------------------------
    // Idempotency
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (store, _dir) = open_store().await;
        let first = store.put("c1", b"data", None).await.unwrap();
        let second = store.put("c1", b"data", None).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.hash, second.hash);
        assert_eq!(store.chunk_count().await, 1);

        let (bytes, _) = store.get("c1").await.unwrap();
        assert_eq!(&bytes[..], b"data");
    }

    #[tokio::test]
    async fn test_put_same_id_different_bytes_with_hash_rejected() {
        let (store, _dir) = open_store().await;
        store.put("c1", b"original", None).await.unwrap();
        let new_hash = ContentHash::of(b"different");
        let err = store.put("c1", b"different", Some(new_hash)).await.unwrap_err();
        assert!(matches!(err, NodeError::IntegrityMismatch { .. }));
        let (bytes, _) = store.get("c1").await.unwrap();
        assert_eq!(&bytes[..], b"original");
    }

    // ---------------------------------------------------------------
    // Get / head
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = open_store().await;
        let payload: Vec<u8> = (0..1000u32).flat_map(|i| i.to_le_bytes()).collect();
        let outcome = store.put("c1", &payload, None).await.unwrap();
        let (bytes, entry) = store.get("c1").await.unwrap();
        assert_eq!(&bytes[..], &payload[..]);
        assert_eq!(entry.hash, outcome.hash);
        assert_eq!(entry.size, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_get_absent_is_not_found() {
        let (store, _dir) = open_store().await;
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            NodeError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_head_returns_entry_without_body() {
        let (store, _dir) = open_store().await;
        store.put("c1", b"data", None).await.unwrap();
        let entry = store.head("c1").await.unwrap();
        assert_eq!(entry.size, 4);
        assert_eq!(entry.hash, ContentHash::of(b"data"));
    }

    #[tokio::test]
    async fn test_get_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), 1024 * 1024, TEST_CAPACITY)
            .await
            .unwrap();
        store.put("c1", b"pristine-bytes", None).await.unwrap();

        // Flip bytes inside the superblock file behind the store's back.
        let path = dir.path().join("data/superblock_0.dat");
        let mut raw = std::fs::read(&path).unwrap();
        raw[0] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let err = store.get("c1").await.unwrap_err();
        assert!(matches!(err, NodeError::CorruptionDetected(_)));
    }

    // ---------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_removes_index_only() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), 1024 * 1024, TEST_CAPACITY)
            .await
            .unwrap();
        store.put("c1", b"data", None).await.unwrap();

        assert!(store.delete("c1").await.unwrap());
        assert!(matches!(
            store.get("c1").await.unwrap_err(),
            NodeError::NotFound(_)
        ));

        // Superblock bytes survive the delete.
        let meta = std::fs::metadata(dir.path().join("data/superblock_0.dat")).unwrap();
        assert_eq!(meta.len(), 4);
    }

    #[tokio::test]
    async fn test_delete_absent_is_idempotent() {
        let (store, _dir) = open_store().await;
        assert!(!store.delete("never-stored").await.unwrap());
    }

    // ---------------------------------------------------------------
    // Capacity and health
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_refused_at_critical_usage() {
        let dir = TempDir::new().unwrap();
        // Capacity of 100 bytes: a 96-byte chunk brings usage to 0.96.
        let store = ChunkStore::open(dir.path(), 1024, 100).await.unwrap();
        store.put("c1", &vec![1u8; 96], None).await.unwrap();
        let err = store.put("c2", b"more", None).await.unwrap_err();
        assert!(matches!(err, NodeError::CapacityExhausted { .. }));
    }

    #[tokio::test]
    async fn test_health_state_thresholds() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), 1024, 100).await.unwrap();
        assert_eq!(store.stats().await.state, HealthState::Healthy);

        store.put("c1", &vec![1u8; 86], None).await.unwrap();
        assert_eq!(store.stats().await.state, HealthState::Warning);

        store.put("c2", &vec![1u8; 9], None).await.unwrap();
        assert_eq!(store.stats().await.state, HealthState::Critical);
    }

    // ---------------------------------------------------------------
    // Recovery
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_reopen_recovers_index_and_data() {
        let dir = TempDir::new().unwrap();
        {
            let store = ChunkStore::open(dir.path(), 1024 * 1024, TEST_CAPACITY)
                .await
                .unwrap();
            for i in 0..20 {
                store
                    .put(&format!("c{i}"), format!("payload-{i}").as_bytes(), None)
                    .await
                    .unwrap();
            }
        }
        let store = ChunkStore::open(dir.path(), 1024 * 1024, TEST_CAPACITY)
            .await
            .unwrap();
        assert_eq!(store.chunk_count().await, 20);
        let (bytes, _) = store.get("c7").await.unwrap();
        assert_eq!(&bytes[..], b"payload-7");

        // New puts after recovery are accepted as new chunks.
        let outcome = store.put("c20", b"payload-20", None).await.unwrap();
        assert!(outcome.created);
    }
}
