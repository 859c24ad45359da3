//! Superblock Files - Append-Only Chunk Containers
//!
//! Chunks are persisted by appending to a sequence of container files named
//! `superblock_{N}.dat` under `<data_dir>/data/`. Each file is capped at a
//! configured size (default 1 GiB); when an append would push the current
//! file past the cap, the writer rotates to the next ordinal.
//!
//! ## Invariants
//!
//! - Superblock files are append-only; bytes are never rewritten or
//!   truncated. Deleting a chunk only removes its index entry.
//! - An append is durable (fsynced) before the caller may publish the index
//!   entry that points at it.
//! - Rotation triggers only when the append would strictly exceed the cap;
//!   a chunk that lands the file exactly on the cap does not rotate.
//!
//! ## Concurrency
//!
//! One writer at a time: `append` serializes through an internal mutex that
//! also tracks the current ordinal. Reads open the target file independently
//! and never take the writer lock, so gets are not serialized behind puts.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};

/// Default superblock size cap (1 GiB).
pub const DEFAULT_MAX_SUPERBLOCK_SIZE: u64 = 1024 * 1024 * 1024;

/// Location of an appended payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendLocation {
    /// Superblock ordinal the bytes landed in.
    pub superblock: u64,
    /// Byte offset of the payload within that superblock.
    pub offset: u64,
}

pub(crate) struct Writer {
    current: u64,
}

/// Append-only store of superblock container files.
pub struct SuperblockStore {
    dir: PathBuf,
    max_size: u64,
    writer: Mutex<Writer>,
}

impl SuperblockStore {
    /// Open the store, creating the data directory and resuming appends at
    /// the highest existing superblock ordinal.
    pub async fn open(data_dir: &Path, max_size: u64) -> Result<Self> {
        let dir = data_dir.join("data");
        tokio::fs::create_dir_all(&dir).await?;

        let current = Self::scan_highest_ordinal(&dir).await?;
        if current > 0 || Self::path_for(&dir, 0).exists() {
            info!(superblock = current, "Resuming appends to existing superblock");
        }

        Ok(Self {
            dir,
            max_size,
            writer: Mutex::new(Writer { current }),
        })
    }

    /// Highest `superblock_{N}.dat` ordinal present, or 0 when none exist.
    async fn scan_highest_ordinal(dir: &Path) -> Result<u64> {
        let mut highest = 0u64;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(ordinal) = name
                .strip_prefix("superblock_")
                .and_then(|rest| rest.strip_suffix(".dat"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                if ordinal > highest {
                    highest = ordinal;
                }
            }
        }
        Ok(highest)
    }

    fn path_for(dir: &Path, ordinal: u64) -> PathBuf {
        dir.join(format!("superblock_{ordinal}.dat"))
    }

    fn path(&self, ordinal: u64) -> PathBuf {
        Self::path_for(&self.dir, ordinal)
    }

    /// Sum of all superblock file sizes, used for usage accounting at startup.
    pub async fn total_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Acquire the writer lock without blocking. Used by delete to refuse
    /// while an append is in flight.
    pub(crate) fn try_writer(&self) -> Option<MutexGuard<'_, Writer>> {
        self.writer.try_lock().ok()
    }

    /// Append a payload to the current superblock, rotating first if the
    /// write would push it past the size cap. The bytes are fsynced before
    /// the location is returned.
    pub async fn append(&self, data: &[u8]) -> Result<AppendLocation> {
        let mut writer = self.writer.lock().await;

        let current_size = match tokio::fs::metadata(self.path(writer.current)).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(NodeError::StorageFault(e.to_string())),
        };

        if current_size + data.len() as u64 > self.max_size {
            writer.current += 1;
            info!(
                superblock = writer.current,
                previous_size = current_size,
                "Rotating to new superblock"
            );
        }

        let path = self.path(writer.current);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| NodeError::StorageFault(format!("open {}: {e}", path.display())))?;

        let offset = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|e| NodeError::StorageFault(format!("seek: {e}")))?;

        file.write_all(data)
            .await
            .map_err(|e| NodeError::StorageFault(format!("append: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| NodeError::StorageFault(format!("fsync: {e}")))?;

        debug!(
            superblock = writer.current,
            offset,
            len = data.len(),
            "Appended chunk payload"
        );

        Ok(AppendLocation {
            superblock: writer.current,
            offset,
        })
    }

    /// Read exactly `len` bytes at `offset` from the given superblock.
    /// Short reads and I/O failures surface as corruption.
    pub async fn read(&self, superblock: u64, offset: u64, len: u64) -> Result<Vec<u8>> {
        let path = self.path(superblock);
        let mut file = File::open(&path)
            .await
            .map_err(|e| NodeError::CorruptionDetected(format!("open {}: {e}", path.display())))?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| NodeError::CorruptionDetected(format!("seek: {e}")))?;

        let mut data = vec![0u8; len as usize];
        if let Err(e) = file.read_exact(&mut data).await {
            warn!(
                superblock,
                offset, len, error = %e,
                "Short read from superblock"
            );
            return Err(NodeError::CorruptionDetected(format!("short read: {e}")));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(max_size: u64) -> (SuperblockStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SuperblockStore::open(dir.path(), max_size).await.unwrap();
        (store, dir)
    }

    // ---------------------------------------------------------------
    // Append / read
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_append_then_read_roundtrip() {
        let (store, _dir) = open_store(1024).await;
        let loc = store.append(b"hello world").await.unwrap();
        assert_eq!(loc.superblock, 0);
        assert_eq!(loc.offset, 0);
        let data = store.read(loc.superblock, loc.offset, 11).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_sequential_appends_advance_offset() {
        let (store, _dir) = open_store(1024).await;
        let a = store.append(b"aaaa").await.unwrap();
        let b = store.append(b"bbbb").await.unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 4);
        assert_eq!(store.read(b.superblock, b.offset, 4).await.unwrap(), b"bbbb");
    }

    #[tokio::test]
    async fn test_read_past_end_is_corruption() {
        let (store, _dir) = open_store(1024).await;
        let loc = store.append(b"abc").await.unwrap();
        let err = store.read(loc.superblock, 0, 100).await.unwrap_err();
        assert!(matches!(err, NodeError::CorruptionDetected(_)));
    }

    // ---------------------------------------------------------------
    // Rotation
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_exact_fit_does_not_rotate() {
        let (store, _dir) = open_store(8).await;
        let a = store.append(b"1234").await.unwrap();
        let b = store.append(b"5678").await.unwrap();
        assert_eq!(a.superblock, 0);
        assert_eq!(b.superblock, 0);
    }

    #[tokio::test]
    async fn test_overflow_rotates_to_next_ordinal() {
        let (store, _dir) = open_store(8).await;
        store.append(b"1234").await.unwrap();
        let b = store.append(b"56789").await.unwrap();
        assert_eq!(b.superblock, 1);
        assert_eq!(b.offset, 0);
    }

    #[tokio::test]
    async fn test_rotation_preserves_old_data() {
        let (store, _dir) = open_store(8).await;
        let a = store.append(b"12345678").await.unwrap();
        let b = store.append(b"9").await.unwrap();
        assert_eq!(b.superblock, 1);
        assert_eq!(store.read(a.superblock, 0, 8).await.unwrap(), b"12345678");
    }

    // ---------------------------------------------------------------
    // Startup scan
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_reopen_resumes_highest_ordinal() {
        let dir = TempDir::new().unwrap();
        {
            let store = SuperblockStore::open(dir.path(), 8).await.unwrap();
            store.append(b"12345678").await.unwrap();
            store.append(b"x").await.unwrap(); // rotates to 1
        }
        let store = SuperblockStore::open(dir.path(), 8).await.unwrap();
        let loc = store.append(b"y").await.unwrap();
        assert_eq!(loc.superblock, 1);
        assert_eq!(loc.offset, 1);
    }

    #[tokio::test]
    async fn test_scan_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("data")).await.unwrap();
        tokio::fs::write(dir.path().join("data/notes.txt"), b"x")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("data/superblock_7.dat"), b"x")
            .await
            .unwrap();
        let store = SuperblockStore::open(dir.path(), 1024).await.unwrap();
        let loc = store.append(b"y").await.unwrap();
        assert_eq!(loc.superblock, 7);
    }
}
