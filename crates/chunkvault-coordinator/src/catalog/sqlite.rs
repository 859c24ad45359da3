//! SQLite Catalog Implementation
//!
//! Single-file embedded catalog over an sqlx connection pool. The schema is
//! created at startup; foreign keys are enforced and the journal runs in
//! WAL mode so readers are not blocked by the commit transactions.
//!
//! ## Schema
//!
//! - `streams`: one row per stream; carries the frozen redundancy mode and
//!   any manual override.
//! - `chunks`: one row per committed chunk, unique on `(stream, sequence)`.
//! - `replicas`: composite key `(chunk_id, node_url)`, ballot recorded.
//! - `fragments`: one row per erasure fragment, unique on
//!   `(chunk_id, fragment_index)`.
//! - `nodes`: keyed by node id; re-registration updates the URL in place.
//! - `proposals`: placement consensus state, keyed by chunk id.
//! - `stream_stats`: popularity counters.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use chunkvault_core::{
    ChunkId, ChunkLocations, ContentHash, FragmentLocation, ManifestChunk, NodeId, NodeUrl,
    RedundancyMode, StreamId, StreamManifest, StreamStatus, CHUNK_DURATION_SEC, CHUNK_SIZE_BYTES,
};

use crate::catalog::{
    Catalog, ChunkRecord, CommittedPlacement, FragmentRecord, NodeRecord, NodeState,
    OverheadStats, ProposalPhase, ProposalRecord, ReplicaRecord, ReplicaStatus, StreamRecord,
};
use crate::error::{CoordinatorError, Result};
use crate::redundancy::REPLICATION_FACTOR;

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (or create) the catalog at `path`.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))
                .map_err(CoordinatorError::Database)?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.create_tables().await?;
        info!(path = %path.as_ref().display(), "Catalog initialized");
        Ok(catalog)
    }

    /// In-memory catalog for tests. A single connection keeps every query
    /// on the same in-memory database.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(CoordinatorError::Database)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let catalog = Self { pool };
        catalog.create_tables().await?;
        Ok(catalog)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn create_tables(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS streams (
                stream_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                duration_sec INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                chunk_size_bytes INTEGER NOT NULL,
                chunk_duration_sec INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'uploading',
                redundancy_mode TEXT,
                redundancy_override TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                stream_id TEXT NOT NULL REFERENCES streams(stream_id),
                sequence_num INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                hash TEXT NOT NULL,
                redundancy_mode TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(stream_id, sequence_num)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS replicas (
                chunk_id TEXT NOT NULL REFERENCES chunks(chunk_id),
                node_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                ballot INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (chunk_id, node_url)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                fragment_id TEXT PRIMARY KEY,
                chunk_id TEXT NOT NULL REFERENCES chunks(chunk_id),
                fragment_index INTEGER NOT NULL,
                node_url TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at INTEGER NOT NULL,
                UNIQUE(chunk_id, fragment_index)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                node_id TEXT PRIMARY KEY,
                node_url TEXT NOT NULL,
                last_heartbeat INTEGER NOT NULL,
                disk_usage REAL NOT NULL DEFAULT 0.0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                version TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS proposals (
                chunk_id TEXT PRIMARY KEY,
                promised_ballot INTEGER NOT NULL DEFAULT 0,
                accepted_ballot INTEGER NOT NULL DEFAULT 0,
                accepted_value TEXT,
                phase TEXT NOT NULL DEFAULT 'none'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS stream_stats (
                stream_id TEXT PRIMARY KEY REFERENCES streams(stream_id),
                view_count INTEGER NOT NULL DEFAULT 0,
                last_viewed INTEGER
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_chunks_stream ON chunks(stream_id, sequence_num)",
            "CREATE INDEX IF NOT EXISTS idx_replicas_chunk ON replicas(chunk_id)",
            "CREATE INDEX IF NOT EXISTS idx_fragments_chunk ON fragments(chunk_id)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn parse_status(raw: &str) -> Result<StreamStatus> {
        StreamStatus::parse(raw)
            .ok_or_else(|| CoordinatorError::CorruptRow(format!("stream status {raw:?}")))
    }

    fn parse_mode(raw: &str) -> Result<RedundancyMode> {
        RedundancyMode::parse(raw)
            .ok_or_else(|| CoordinatorError::CorruptRow(format!("redundancy mode {raw:?}")))
    }

    fn parse_replica_status(raw: &str) -> Result<ReplicaStatus> {
        ReplicaStatus::parse(raw)
            .ok_or_else(|| CoordinatorError::CorruptRow(format!("replica status {raw:?}")))
    }

    fn stream_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StreamRecord> {
        let stream_id: String = row.try_get("stream_id")?;
        let status: String = row.try_get("status")?;
        let mode: Option<String> = row.try_get("redundancy_mode")?;
        let override_mode: Option<String> = row.try_get("redundancy_override")?;
        Ok(StreamRecord {
            stream_id: StreamId::parse(&stream_id)
                .map_err(|_| CoordinatorError::CorruptRow(format!("stream id {stream_id:?}")))?,
            title: row.try_get("title")?,
            duration_sec: row.try_get::<i64, _>("duration_sec")? as u64,
            total_chunks: row.try_get::<i64, _>("total_chunks")? as u64,
            chunk_size_bytes: row.try_get::<i64, _>("chunk_size_bytes")? as u64,
            chunk_duration_sec: row.try_get::<i64, _>("chunk_duration_sec")? as u64,
            status: Self::parse_status(&status)?,
            redundancy_mode: mode.as_deref().map(Self::parse_mode).transpose()?,
            redundancy_override: override_mode.as_deref().map(Self::parse_mode).transpose()?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkRecord> {
        let chunk_id: String = row.try_get("chunk_id")?;
        let stream_id: String = row.try_get("stream_id")?;
        let hash: String = row.try_get("hash")?;
        let mode: String = row.try_get("redundancy_mode")?;
        Ok(ChunkRecord {
            chunk_id: ChunkId::parse(&chunk_id)
                .map_err(|_| CoordinatorError::CorruptRow(format!("chunk id {chunk_id:?}")))?,
            stream_id: StreamId::parse(&stream_id)
                .map_err(|_| CoordinatorError::CorruptRow(format!("stream id {stream_id:?}")))?,
            sequence: row.try_get::<i64, _>("sequence_num")? as u64,
            size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
            hash: ContentHash::parse(hash)
                .map_err(|e| CoordinatorError::CorruptRow(e.to_string()))?,
            redundancy_mode: Self::parse_mode(&mode)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn fragment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FragmentRecord> {
        let fragment_id: String = row.try_get("fragment_id")?;
        let chunk_id: String = row.try_get("chunk_id")?;
        let hash: String = row.try_get("hash")?;
        let status: String = row.try_get("status")?;
        Ok(FragmentRecord {
            fragment_id: ChunkId::parse(&fragment_id)
                .map_err(|_| CoordinatorError::CorruptRow(format!("fragment id {fragment_id:?}")))?,
            chunk_id: ChunkId::parse(&chunk_id)
                .map_err(|_| CoordinatorError::CorruptRow(format!("chunk id {chunk_id:?}")))?,
            fragment_index: row.try_get::<i64, _>("fragment_index")? as u32,
            node_url: NodeUrl::new(row.try_get::<String, _>("node_url")?),
            size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
            hash: ContentHash::parse(hash)
                .map_err(|e| CoordinatorError::CorruptRow(e.to_string()))?,
            status: Self::parse_replica_status(&status)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn node_from_row(row: &sqlx::sqlite::SqliteRow, now_ms: i64, timeout_ms: i64) -> Result<NodeRecord> {
        let last_heartbeat: i64 = row.try_get("last_heartbeat")?;
        let disk_usage: f64 = row.try_get("disk_usage")?;
        let state = if now_ms - last_heartbeat >= timeout_ms {
            NodeState::Down
        } else if disk_usage >= crate::redundancy::DISK_USAGE_WARN {
            NodeState::Degraded
        } else {
            NodeState::Healthy
        };
        Ok(NodeRecord {
            node_url: NodeUrl::new(row.try_get::<String, _>("node_url")?),
            node_id: NodeId::new(row.try_get::<String, _>("node_id")?),
            last_heartbeat,
            disk_usage,
            chunk_count: row.try_get::<i64, _>("chunk_count")? as u64,
            version: row.try_get("version")?,
            state,
        })
    }

    async fn commit_chunk_body(
        tx: &mut sqlx::sqlite::SqliteConnection,
        placement: &CommittedPlacement,
    ) -> Result<()> {
        let now = Self::now_ms();
        let stream_key = placement.stream_id.to_string();

        // Ballot safety check inside the transaction.
        let promised: Option<i64> =
            sqlx::query("SELECT promised_ballot FROM proposals WHERE chunk_id = ?")
                .bind(placement.chunk_id.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("promised_ballot"))
                .transpose()?;
        if let Some(promised) = promised {
            if promised > placement.ballot {
                return Err(CoordinatorError::BallotConflict {
                    promised,
                    proposed: placement.ballot,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chunks
                (chunk_id, stream_id, sequence_num, size_bytes, hash, redundancy_mode, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(placement.chunk_id.as_str())
        .bind(&stream_key)
        .bind(placement.sequence as i64)
        .bind(placement.size_bytes as i64)
        .bind(placement.hash.as_str())
        .bind(placement.mode.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        match placement.mode {
            RedundancyMode::Replicated => {
                for node_url in &placement.nodes {
                    sqlx::query(
                        r#"
                        INSERT OR REPLACE INTO replicas
                            (chunk_id, node_url, status, ballot, created_at)
                        VALUES (?, ?, 'active', ?, ?)
                        "#,
                    )
                    .bind(placement.chunk_id.as_str())
                    .bind(node_url.as_str())
                    .bind(placement.ballot)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            RedundancyMode::Erasure => {
                for fragment in &placement.fragments {
                    let fragment_id = placement.chunk_id.fragment(fragment.fragment_index);
                    sqlx::query(
                        r#"
                        INSERT OR REPLACE INTO fragments
                            (fragment_id, chunk_id, fragment_index, node_url, size_bytes, hash, status, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, 'active', ?)
                        "#,
                    )
                    .bind(fragment_id.as_str())
                    .bind(placement.chunk_id.as_str())
                    .bind(fragment.fragment_index as i64)
                    .bind(fragment.node_url.as_str())
                    .bind(fragment.size_bytes as i64)
                    .bind(fragment.hash.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        // Stream bookkeeping: chunk count and the frozen redundancy mode.
        sqlx::query(
            r#"
            UPDATE streams
            SET total_chunks = (SELECT COUNT(*) FROM chunks WHERE stream_id = ?),
                redundancy_mode = COALESCE(redundancy_mode, ?)
            WHERE stream_id = ?
            "#,
        )
        .bind(&stream_key)
        .bind(placement.mode.as_str())
        .bind(&stream_key)
        .execute(&mut *tx)
        .await?;

        let accepted_value = serde_json::to_string(
            &placement
                .nodes
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>(),
        )?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO proposals
                (chunk_id, promised_ballot, accepted_ballot, accepted_value, phase)
            VALUES (?, ?, ?, ?, 'committed')
            "#,
        )
        .bind(placement.chunk_id.as_str())
        .bind(placement.ballot)
        .bind(placement.ballot)
        .bind(accepted_value)
        .execute(&mut *tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn create_stream(&self, title: &str, duration_sec: u64) -> Result<StreamRecord> {
        if title.is_empty() {
            return Err(CoordinatorError::InvalidRequest("empty title".to_string()));
        }
        let stream_id = StreamId::generate();
        let now = Self::now_ms();
        sqlx::query(
            r#"
            INSERT INTO streams
                (stream_id, title, duration_sec, chunk_size_bytes, chunk_duration_sec, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'uploading', ?)
            "#,
        )
        .bind(stream_id.to_string())
        .bind(title)
        .bind(duration_sec as i64)
        .bind(CHUNK_SIZE_BYTES as i64)
        .bind(CHUNK_DURATION_SEC as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StreamRecord {
            stream_id,
            title: title.to_string(),
            duration_sec,
            total_chunks: 0,
            chunk_size_bytes: CHUNK_SIZE_BYTES as u64,
            chunk_duration_sec: CHUNK_DURATION_SEC,
            status: StreamStatus::Uploading,
            redundancy_mode: None,
            redundancy_override: None,
            created_at: now,
        })
    }

    async fn get_stream(&self, stream_id: StreamId) -> Result<Option<StreamRecord>> {
        let row = sqlx::query("SELECT * FROM streams WHERE stream_id = ?")
            .bind(stream_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::stream_from_row).transpose()
    }

    async fn list_streams(&self, limit: u32, offset: u32) -> Result<Vec<StreamRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM streams
            WHERE status != 'deleted'
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::stream_from_row).collect()
    }

    async fn set_stream_status(&self, stream_id: StreamId, status: StreamStatus) -> Result<()> {
        let affected = sqlx::query("UPDATE streams SET status = ? WHERE stream_id = ?")
            .bind(status.as_str())
            .bind(stream_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(CoordinatorError::StreamNotFound(stream_id));
        }
        Ok(())
    }

    async fn manifest(&self, stream_id: StreamId) -> Result<Option<StreamManifest>> {
        let Some(stream) = self.get_stream(stream_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE stream_id = ? ORDER BY sequence_num",
        )
        .bind(stream_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::chunk_from_row(row)?;
            let locations = match chunk.redundancy_mode {
                RedundancyMode::Replicated => {
                    let replicas = self.get_replicas(&chunk.chunk_id).await?;
                    ChunkLocations::Replicated {
                        replicas: replicas
                            .into_iter()
                            .filter(|r| r.status == ReplicaStatus::Active)
                            .map(|r| r.node_url)
                            .collect(),
                    }
                }
                RedundancyMode::Erasure => {
                    let fragments = self.get_fragments(&chunk.chunk_id).await?;
                    ChunkLocations::Erasure {
                        fragments: fragments
                            .into_iter()
                            .filter(|f| f.status == ReplicaStatus::Active)
                            .map(|f| FragmentLocation {
                                index: f.fragment_index,
                                node_url: f.node_url,
                                size_bytes: f.size_bytes,
                                hash: f.hash,
                            })
                            .collect(),
                    }
                }
            };
            chunks.push(ManifestChunk {
                chunk_id: chunk.chunk_id,
                sequence: chunk.sequence,
                size_bytes: chunk.size_bytes,
                hash: chunk.hash,
                locations,
            });
        }

        Ok(Some(StreamManifest {
            stream_id,
            title: stream.title,
            duration_sec: stream.duration_sec,
            total_chunks: stream.total_chunks,
            chunk_duration_sec: stream.chunk_duration_sec,
            chunk_size_bytes: stream.chunk_size_bytes,
            status: stream.status,
            chunks,
        }))
    }

    async fn commit_chunk(&self, placement: &CommittedPlacement) -> Result<()> {
        // `BEGIN IMMEDIATE` grabs the write lock up front instead of the
        // default deferred BEGIN, which would only take it on the first
        // write and can otherwise hit a stale-snapshot SQLITE_BUSY when
        // distinct chunk commits run concurrently (see placement.rs: distinct
        // chunk ids are intentionally allowed to commit in parallel).
        let mut tx = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *tx).await?;
        let result = Self::commit_chunk_body(&mut tx, placement).await;
        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *tx).await?;
                Ok(())
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *tx).await;
                Err(err)
            }
        }
    }


    async fn get_chunk(&self, chunk_id: &ChunkId) -> Result<Option<ChunkRecord>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::chunk_from_row).transpose()
    }

    async fn get_replicas(&self, chunk_id: &ChunkId) -> Result<Vec<ReplicaRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM replicas WHERE chunk_id = ? ORDER BY node_url",
        )
        .bind(chunk_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(ReplicaRecord {
                    chunk_id: chunk_id.clone(),
                    node_url: NodeUrl::new(row.try_get::<String, _>("node_url")?),
                    status: Self::parse_replica_status(&status)?,
                    ballot: row.try_get("ballot")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn get_fragments(&self, chunk_id: &ChunkId) -> Result<Vec<FragmentRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM fragments WHERE chunk_id = ? ORDER BY fragment_index",
        )
        .bind(chunk_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::fragment_from_row).collect()
    }

    async fn get_proposal(&self, chunk_id: &ChunkId) -> Result<Option<ProposalRecord>> {
        let row = sqlx::query("SELECT * FROM proposals WHERE chunk_id = ?")
            .bind(chunk_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let phase: String = row.try_get("phase")?;
        let accepted_value: Option<String> = row.try_get("accepted_value")?;
        let accepted_value = accepted_value
            .map(|raw| -> Result<Vec<NodeUrl>> {
                let urls: Vec<String> = serde_json::from_str(&raw)?;
                Ok(urls.into_iter().map(NodeUrl::new).collect())
            })
            .transpose()?;
        Ok(Some(ProposalRecord {
            chunk_id: chunk_id.clone(),
            promised_ballot: row.try_get("promised_ballot")?,
            accepted_ballot: row.try_get("accepted_ballot")?,
            accepted_value,
            phase: ProposalPhase::parse(&phase)
                .ok_or_else(|| CoordinatorError::CorruptRow(format!("proposal phase {phase:?}")))?,
        }))
    }

    async fn save_proposal(&self, proposal: &ProposalRecord) -> Result<()> {
        let accepted_value = proposal
            .accepted_value
            .as_ref()
            .map(|urls| {
                serde_json::to_string(&urls.iter().map(|u| u.as_str()).collect::<Vec<_>>())
            })
            .transpose()?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO proposals
                (chunk_id, promised_ballot, accepted_ballot, accepted_value, phase)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(proposal.chunk_id.as_str())
        .bind(proposal.promised_ballot)
        .bind(proposal.accepted_ballot)
        .bind(accepted_value)
        .bind(proposal.phase.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn register_node(
        &self,
        node_url: &NodeUrl,
        node_id: &NodeId,
        version: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (node_id, node_url, last_heartbeat, version)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                node_url = excluded.node_url,
                last_heartbeat = excluded.last_heartbeat,
                version = excluded.version
            "#,
        )
        .bind(node_id.as_str())
        .bind(node_url.as_str())
        .bind(Self::now_ms())
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, node_id: &NodeId, disk_usage: f64, chunk_count: u64) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE nodes
            SET last_heartbeat = ?, disk_usage = ?, chunk_count = ?
            WHERE node_id = ?
            "#,
        )
        .bind(Self::now_ms())
        .bind(disk_usage)
        .bind(chunk_count as i64)
        .bind(node_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(CoordinatorError::NodeNotFound(node_id.to_string()));
        }
        Ok(())
    }

    async fn list_nodes(&self, now_ms: i64, timeout_ms: i64) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY node_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Self::node_from_row(row, now_ms, timeout_ms))
            .collect()
    }

    async fn healthy_nodes(
        &self,
        now_ms: i64,
        timeout_ms: i64,
        warn: f64,
    ) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM nodes
            WHERE last_heartbeat > ? AND disk_usage < ?
            ORDER BY disk_usage ASC
            "#,
        )
        .bind(now_ms - timeout_ms)
        .bind(warn)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Self::node_from_row(row, now_ms, timeout_ms))
            .collect()
    }

    async fn increment_popularity(&self, stream_id: StreamId) -> Result<u64> {
        if self.get_stream(stream_id).await?.is_none() {
            return Err(CoordinatorError::StreamNotFound(stream_id));
        }
        sqlx::query(
            r#"
            INSERT INTO stream_stats (stream_id, view_count, last_viewed)
            VALUES (?, 1, ?)
            ON CONFLICT(stream_id) DO UPDATE SET
                view_count = view_count + 1,
                last_viewed = excluded.last_viewed
            "#,
        )
        .bind(stream_id.to_string())
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await?;
        self.get_popularity(stream_id).await
    }

    async fn get_popularity(&self, stream_id: StreamId) -> Result<u64> {
        let row = sqlx::query("SELECT view_count FROM stream_stats WHERE stream_id = ?")
            .bind(stream_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<i64, _>("view_count"))
            .transpose()?
            .unwrap_or(0) as u64)
    }

    async fn set_redundancy_override(
        &self,
        stream_id: StreamId,
        mode: RedundancyMode,
    ) -> Result<()> {
        let affected =
            sqlx::query("UPDATE streams SET redundancy_override = ? WHERE stream_id = ?")
                .bind(mode.as_str())
                .bind(stream_id.to_string())
                .execute(&self.pool)
                .await?
                .rows_affected();
        if affected == 0 {
            return Err(CoordinatorError::StreamNotFound(stream_id));
        }
        Ok(())
    }

    async fn clear_redundancy_override(&self, stream_id: StreamId) -> Result<()> {
        let affected =
            sqlx::query("UPDATE streams SET redundancy_override = NULL WHERE stream_id = ?")
                .bind(stream_id.to_string())
                .execute(&self.pool)
                .await?
                .rows_affected();
        if affected == 0 {
            return Err(CoordinatorError::StreamNotFound(stream_id));
        }
        Ok(())
    }

    async fn overhead_stats(&self) -> Result<OverheadStats> {
        let mode_rows = sqlx::query(
            r#"
            SELECT redundancy_mode, COUNT(*) AS n, COALESCE(SUM(size_bytes), 0) AS bytes
            FROM chunks GROUP BY redundancy_mode
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut replicated_chunks = 0u64;
        let mut erasure_chunks = 0u64;
        let mut logical_bytes = 0u64;
        for row in &mode_rows {
            let mode: String = row.try_get("redundancy_mode")?;
            let n: i64 = row.try_get("n")?;
            let bytes: i64 = row.try_get("bytes")?;
            logical_bytes += bytes as u64;
            match Self::parse_mode(&mode)? {
                RedundancyMode::Replicated => replicated_chunks = n as u64,
                RedundancyMode::Erasure => erasure_chunks = n as u64,
            }
        }

        let replica_bytes: i64 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(c.size_bytes), 0) AS bytes
            FROM replicas r JOIN chunks c ON r.chunk_id = c.chunk_id
            WHERE r.status = 'active'
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("bytes")?;

        let fragment_bytes: i64 =
            sqlx::query("SELECT COALESCE(SUM(size_bytes), 0) AS bytes FROM fragments WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?
                .try_get("bytes")?;

        let physical_bytes = (replica_bytes + fragment_bytes) as u64;
        let overhead_ratio = if logical_bytes == 0 {
            0.0
        } else {
            physical_bytes as f64 / logical_bytes as f64
        };
        let savings_vs_replication = if logical_bytes == 0 {
            0.0
        } else {
            let baseline = logical_bytes as f64 * REPLICATION_FACTOR as f64;
            (baseline - physical_bytes as f64) / baseline
        };

        Ok(OverheadStats {
            replicated_chunks,
            erasure_chunks,
            logical_bytes,
            physical_bytes,
            overhead_ratio,
            savings_vs_replication,
        })
    }
}
