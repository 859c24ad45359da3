//! HTTP Handlers for the Storage Node
//!
//! The request surface:
//!
//! | Operation   | Method + path        | Success                         |
//! |-------------|----------------------|---------------------------------|
//! | Put chunk   | PUT /chunk/{id}      | 201 Created / 200 OK (existing) |
//! | Get chunk   | GET /chunk/{id}      | 200 with body                   |
//! | Head chunk  | HEAD /chunk/{id}     | 200, headers only               |
//! | Delete      | DELETE /chunk/{id}   | 204                             |
//! | Probe       | HEAD /ping           | 200, measurement headers        |
//! | Health      | GET /health          | 200 (503 when critical)         |
//!
//! The probe handler answers entirely from cached counters so its latency
//! reflects the network path, not the disk.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error};

use chunkvault_core::ContentHash;

use crate::error::NodeError;
use crate::store::HealthState;
use crate::AppState;

/// Header carrying the caller's expected checksum on put.
pub const CHECKSUM_HEADER: &str = "x-chunk-checksum";

impl NodeError {
    fn status(&self) -> StatusCode {
        match self {
            NodeError::InvalidChunkId(_)
            | NodeError::EmptyChunk
            | NodeError::IntegrityMismatch { .. } => StatusCode::BAD_REQUEST,
            NodeError::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            NodeError::NotFound(_) => StatusCode::NOT_FOUND,
            NodeError::CapacityExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            NodeError::WriteInProgress(_) => StatusCode::CONFLICT,
            NodeError::CorruptionDetected(_)
            | NodeError::StorageFault(_)
            | NodeError::Io(_)
            | NodeError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

fn header_value(value: &str) -> HeaderValue {
    // All generated header values are ASCII (hex digests, decimal numbers,
    // validated ids); fall back to a marker rather than panicking.
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

fn chunk_headers(size: u64, hash: &ContentHash, superblock: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::ETAG, header_value(hash.as_str()));
    headers.insert("X-Chunk-Size", header_value(&size.to_string()));
    headers.insert("X-Superblock-ID", header_value(&superblock.to_string()));
    headers
}

/// PUT /chunk/{id}
pub async fn put_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, NodeError> {
    let expected = match headers.get(CHECKSUM_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw) => Some(ContentHash::parse(raw.trim_matches('"')).map_err(|_| {
            NodeError::IntegrityMismatch {
                expected: raw.to_string(),
                computed: "malformed checksum header".to_string(),
            }
        })?),
        None => None,
    };

    let outcome = state.store.put(&chunk_id, &body, expected).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        header_value(&format!("/chunk/{chunk_id}")),
    );
    headers.insert(header::ETAG, header_value(outcome.hash.as_str()));
    headers.insert("X-Chunk-Size", header_value(&outcome.size.to_string()));

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, headers).into_response())
}

/// GET /chunk/{id}
pub async fn get_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Response, NodeError> {
    let (data, entry) = state.store.get(&chunk_id).await?;
    let headers = chunk_headers(entry.size, &entry.hash, entry.superblock);
    Ok((StatusCode::OK, headers, data).into_response())
}

/// HEAD /chunk/{id} — same headers as GET, no body, no disk read.
pub async fn head_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Response, NodeError> {
    let entry = state.store.head(&chunk_id).await?;
    let mut headers = chunk_headers(entry.size, &entry.hash, entry.superblock);
    headers.insert(header::CONTENT_LENGTH, header_value(&entry.size.to_string()));
    Ok((StatusCode::OK, headers).into_response())
}

/// DELETE /chunk/{id} — removes the index entry only; 204 either way.
pub async fn delete_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<StatusCode, NodeError> {
    state.store.delete(&chunk_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// HEAD /ping — the reader's latency measurement target.
pub async fn ping(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let usage = state.store.disk_usage();
    let chunk_count = state.store.chunk_count().await;

    let mut headers = HeaderMap::new();
    headers.insert("X-Node-ID", header_value(&state.node_id));
    headers.insert(
        "X-Disk-Usage-Percent",
        header_value(&format!("{:.2}", usage * 100.0)),
    );
    headers.insert("X-Chunk-Count", header_value(&chunk_count.to_string()));
    headers.insert(
        "X-Response-Time",
        header_value(&format!("{:.3}", started.elapsed().as_secs_f64() * 1000.0)),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    (StatusCode::OK, headers).into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub disk_usage: f64,
    pub chunk_count: usize,
    pub uptime: u64,
    pub node_id: String,
}

/// GET /health — richer diagnostic; critical answers 503.
pub async fn health(State(state): State<AppState>) -> Response {
    let stats = state.store.stats().await;
    let body = HealthResponse {
        status: stats.state.as_str().to_string(),
        disk_usage: stats.disk_usage,
        chunk_count: stats.chunk_count,
        uptime: stats.uptime_sec,
        node_id: state.node_id.clone(),
    };
    let status = if stats.state == HealthState::Critical {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}
