//! In-Memory Chunk Index with Persisted Snapshots
//!
//! The index maps chunk ids to their location on disk: superblock ordinal,
//! byte offset, length, content hash, and store timestamp. Lookups take a
//! read lock only; the put path takes the write lock for the brief moment
//! it publishes a new entry, so reads are never serialized behind disk I/O.
//!
//! ## Snapshot Protocol
//!
//! The snapshot at `<data_dir>/index/chunk_index.json` is written via
//! write-new-file + fsync + atomic rename, so a crash never leaves a torn
//! snapshot behind. Persisting is best effort: the snapshot may lag the
//! last put, and a lost entry only costs a re-put or re-replication. The
//! failed-save counter feeds the node's health state and resets on the
//! first successful save.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use chunkvault_core::{ChunkId, ContentHash};

use crate::error::Result;

/// Location and identity of one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub superblock: u64,
    pub offset: u64,
    pub size: u64,
    pub hash: ContentHash,
    /// Milliseconds since epoch at store time.
    pub stored_at: i64,
}

/// Thread-safe chunk index backed by a JSON snapshot.
pub struct ChunkIndex {
    entries: RwLock<HashMap<ChunkId, ChunkEntry>>,
    snapshot_path: PathBuf,
    failed_saves: AtomicU64,
}

impl ChunkIndex {
    /// Load the index, creating the snapshot directory and reading any
    /// existing snapshot. A missing snapshot is an empty index.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let index_dir = data_dir.join("index");
        tokio::fs::create_dir_all(&index_dir).await?;
        let snapshot_path = index_dir.join("chunk_index.json");

        let entries = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => {
                let raw: HashMap<String, ChunkEntry> = serde_json::from_slice(&bytes)?;
                let mut entries = HashMap::with_capacity(raw.len());
                for (id, entry) in raw {
                    match ChunkId::parse(id) {
                        Ok(id) => {
                            entries.insert(id, entry);
                        }
                        Err(e) => warn!(error = %e, "Dropping snapshot entry with invalid id"),
                    }
                }
                info!(chunks = entries.len(), "Loaded chunk index snapshot");
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            entries: RwLock::new(entries),
            snapshot_path,
            failed_saves: AtomicU64::new(0),
        })
    }

    pub async fn get(&self, id: &ChunkId) -> Option<ChunkEntry> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &ChunkId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Publish a new entry. Holds the write lock only for the map insert.
    pub async fn insert(&self, id: ChunkId, entry: ChunkEntry) {
        self.entries.write().await.insert(id, entry);
    }

    /// Remove an entry, returning whether it existed.
    pub async fn remove(&self, id: &ChunkId) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Consecutive snapshot-save failures since the last success.
    pub fn failed_saves(&self) -> u64 {
        self.failed_saves.load(Ordering::Relaxed)
    }

    /// Persist the snapshot: serialize under the read lock, write to a temp
    /// file, fsync, then atomically rename over the old snapshot.
    pub async fn persist(&self) -> Result<()> {
        let serialized = {
            let entries = self.entries.read().await;
            let raw: HashMap<&str, &ChunkEntry> = entries
                .iter()
                .map(|(id, entry)| (id.as_str(), entry))
                .collect();
            serde_json::to_vec(&raw)?
        };

        let result = self.write_snapshot(&serialized).await;
        match &result {
            Ok(()) => {
                self.failed_saves.store(0, Ordering::Relaxed);
                debug!(bytes = serialized.len(), "Persisted chunk index snapshot");
            }
            Err(e) => {
                let failures = self.failed_saves.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, failures, "Failed to persist chunk index snapshot");
            }
        }
        result
    }

    async fn write_snapshot(&self, serialized: &[u8]) -> Result<()> {
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(serialized).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(superblock: u64, offset: u64, data: &[u8]) -> ChunkEntry {
        ChunkEntry {
            superblock,
            offset,
            size: data.len() as u64,
            hash: ContentHash::of(data),
            stored_at: 1_700_000_000_000,
        }
    }

    fn id(raw: &str) -> ChunkId {
        ChunkId::parse(raw).unwrap()
    }

    // ---------------------------------------------------------------
    // Basic operations
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_insert_get_remove() {
        let dir = TempDir::new().unwrap();
        let index = ChunkIndex::load(dir.path()).await.unwrap();

        index.insert(id("c1"), entry(0, 0, b"data")).await;
        assert!(index.contains(&id("c1")).await);
        assert_eq!(index.get(&id("c1")).await.unwrap().size, 4);
        assert_eq!(index.len().await, 1);

        assert!(index.remove(&id("c1")).await);
        assert!(!index.remove(&id("c1")).await);
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let index = ChunkIndex::load(dir.path()).await.unwrap();
        assert!(index.get(&id("missing")).await.is_none());
    }

    // ---------------------------------------------------------------
    // Snapshot persistence
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let index = ChunkIndex::load(dir.path()).await.unwrap();
            index.insert(id("c1"), entry(0, 0, b"aaaa")).await;
            index.insert(id("c2"), entry(0, 4, b"bbbb")).await;
            index.persist().await.unwrap();
        }
        let index = ChunkIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.len().await, 2);
        assert_eq!(index.get(&id("c2")).await.unwrap().offset, 4);
    }

    #[tokio::test]
    async fn test_reload_without_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = ChunkIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_persist_overwrites_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let index = ChunkIndex::load(dir.path()).await.unwrap();
        index.insert(id("c1"), entry(0, 0, b"aaaa")).await;
        index.persist().await.unwrap();
        index.remove(&id("c1")).await;
        index.insert(id("c2"), entry(1, 0, b"bb")).await;
        index.persist().await.unwrap();

        let reloaded = ChunkIndex::load(dir.path()).await.unwrap();
        assert!(!reloaded.contains(&id("c1")).await);
        assert!(reloaded.contains(&id("c2")).await);
    }

    #[tokio::test]
    async fn test_failed_saves_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let index = ChunkIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.failed_saves(), 0);
        index.persist().await.unwrap();
        assert_eq!(index.failed_saves(), 0);
    }
}
