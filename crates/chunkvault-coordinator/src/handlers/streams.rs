//! Stream management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use chunkvault_core::{StreamManifest, StreamStatus};

use crate::catalog::{Catalog, StreamRecord};
use crate::error::CoordinatorError;
use crate::handlers::parse_stream_id;
use crate::models::{
    CreateStreamRequest, ListStreamsParams, PopularityResponse, UpdateStatusRequest,
};
use crate::AppState;

/// POST /streams
pub async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<CreateStreamRequest>,
) -> Result<(StatusCode, Json<StreamRecord>), CoordinatorError> {
    if req.title.is_empty() {
        return Err(CoordinatorError::InvalidRequest("empty title".to_string()));
    }
    if req.duration_sec == 0 {
        return Err(CoordinatorError::InvalidRequest(
            "duration must be positive".to_string(),
        ));
    }
    let stream = state.catalog.create_stream(&req.title, req.duration_sec).await?;
    tracing::info!(stream_id = %stream.stream_id, title = %stream.title, "Stream created");
    Ok((StatusCode::CREATED, Json(stream)))
}

/// GET /streams
pub async fn list_streams(
    State(state): State<AppState>,
    Query(params): Query<ListStreamsParams>,
) -> Result<Json<Vec<StreamRecord>>, CoordinatorError> {
    let streams = state.catalog.list_streams(params.limit, params.offset).await?;
    Ok(Json(streams))
}

/// GET /streams/:stream_id
pub async fn get_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<StreamRecord>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    let stream = state
        .catalog
        .get_stream(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    Ok(Json(stream))
}

/// PATCH /streams/:stream_id/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StreamRecord>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    if req.status == StreamStatus::Uploading {
        return Err(CoordinatorError::InvalidRequest(
            "streams cannot return to uploading".to_string(),
        ));
    }
    state.catalog.set_stream_status(stream_id, req.status).await?;
    let stream = state
        .catalog
        .get_stream(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    tracing::info!(stream_id = %stream_id, status = req.status.as_str(), "Stream status updated");
    Ok(Json(stream))
}

/// GET /streams/:stream_id/manifest
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<StreamManifest>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    let manifest = state
        .catalog
        .manifest(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    Ok(Json(manifest))
}

/// GET /streams/:stream_id/popularity
pub async fn get_popularity(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<PopularityResponse>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    if state.catalog.get_stream(stream_id).await?.is_none() {
        return Err(CoordinatorError::StreamNotFound(stream_id));
    }
    let popularity = state.catalog.get_popularity(stream_id).await?;
    Ok(Json(PopularityResponse {
        stream_id,
        popularity,
    }))
}

/// POST /streams/:stream_id/view — reader access increments popularity.
pub async fn record_view(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<PopularityResponse>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    let popularity = state.catalog.increment_popularity(stream_id).await?;
    Ok(Json(PopularityResponse {
        stream_id,
        popularity,
    }))
}
