//! Crash-Recovery Integration Tests
//!
//! Simulates ungraceful storage-node restarts by dropping the store without
//! a shutdown flush and reopening over the same data directory.

use chunkvault_node::{ChunkStore, NodeError};

const SUPERBLOCK_CAP: u64 = 64 * 1024;
const CAPACITY: u64 = 64 * 1024 * 1024;

fn payload(i: usize) -> Vec<u8> {
    format!("chunk-payload-{i}-").repeat(32).into_bytes()
}

#[tokio::test]
async fn test_recovery_after_ungraceful_restart() {
    let dir = tempfile::tempdir().unwrap();

    // Write a few hundred chunks across several superblocks, then "crash".
    {
        let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
            .await
            .unwrap();
        for i in 0..300 {
            store.put(&format!("c{i}"), &payload(i), None).await.unwrap();
        }
        // Dropped without flush().
    }

    let superblock_sizes: Vec<(String, u64)> = {
        let mut sizes = Vec::new();
        for entry in std::fs::read_dir(dir.path().join("data")).unwrap() {
            let entry = entry.unwrap();
            sizes.push((
                entry.file_name().to_string_lossy().to_string(),
                entry.metadata().unwrap().len(),
            ));
        }
        sizes.sort();
        sizes
    };
    assert!(
        superblock_sizes.len() > 1,
        "expected multiple superblocks, got {superblock_sizes:?}"
    );

    let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
        .await
        .unwrap();

    // The snapshot is written after every put, so the recovered index
    // covers everything; every entry must be backed by readable bytes.
    assert_eq!(store.chunk_count().await, 300);
    for i in (0..300).step_by(37) {
        let (bytes, _) = store.get(&format!("c{i}")).await.unwrap();
        assert_eq!(&bytes[..], &payload(i)[..]);
    }

    // No superblock was truncated by recovery.
    for (name, size) in &superblock_sizes {
        let meta = std::fs::metadata(dir.path().join("data").join(name)).unwrap();
        assert_eq!(meta.len(), *size, "superblock {name} changed size");
    }

    // New puts after recovery land in the highest superblock as new chunks.
    let outcome = store.put("c300", &payload(300), None).await.unwrap();
    assert!(outcome.created);
    let highest = superblock_sizes.len() as u64 - 1;
    assert!(outcome.superblock >= highest);
}

#[tokio::test]
async fn test_chunk_missing_from_snapshot_is_accepted_as_new_put() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
            .await
            .unwrap();
        store.put("kept", b"kept-bytes", None).await.unwrap();
        store.put("lost", b"lost-bytes", None).await.unwrap();
        store.flush().await.unwrap();
    }

    // Roll the snapshot back to a version that never saw "lost": the
    // snapshot is allowed to lag the last put.
    {
        let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
            .await
            .unwrap();
        store.delete("lost").await.unwrap();
        store.flush().await.unwrap();
    }

    let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
        .await
        .unwrap();
    assert!(matches!(
        store.get("lost").await.unwrap_err(),
        NodeError::NotFound(_)
    ));

    // The writer re-puts; the bytes are appended again and indexed.
    let outcome = store.put("lost", b"lost-bytes", None).await.unwrap();
    assert!(outcome.created);
    let (bytes, _) = store.get("lost").await.unwrap();
    assert_eq!(&bytes[..], b"lost-bytes");
    let (kept, _) = store.get("kept").await.unwrap();
    assert_eq!(&kept[..], b"kept-bytes");
}

#[tokio::test]
async fn test_recovered_store_preserves_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let original_hash;
    {
        let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
            .await
            .unwrap();
        original_hash = store.put("c0", b"stable bytes", None).await.unwrap().hash;
    }
    let store = ChunkStore::open(dir.path(), SUPERBLOCK_CAP, CAPACITY)
        .await
        .unwrap();
    let entry = store.head("c0").await.unwrap();
    assert_eq!(entry.hash, original_hash);
    let (bytes, entry) = store.get("c0").await.unwrap();
    assert!(entry.hash.verify(&bytes));
}
