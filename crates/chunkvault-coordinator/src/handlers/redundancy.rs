//! Redundancy administration endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use chunkvault_core::RedundancyMode;

use crate::catalog::{Catalog, OverheadStats};
use crate::error::CoordinatorError;
use crate::handlers::parse_stream_id;
use crate::models::{EfficiencyResponse, OverrideRequest, OverrideResponse, RecommendResponse};
use crate::redundancy::RedundancyConfig;
use crate::AppState;

/// GET /redundancy/recommend/:stream_id
pub async fn recommend(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<RecommendResponse>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    let stream = state
        .catalog
        .get_stream(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    let popularity = state.catalog.get_popularity(stream_id).await?;
    let mode = state.policy.select(&stream, popularity);
    Ok(Json(RecommendResponse {
        stream_id,
        popularity,
        mode,
        config: RedundancyConfig::for_mode(mode),
        frozen: state.policy.is_frozen(&stream),
    }))
}

/// POST /redundancy/override/:stream_id — set the manual override. Has no
/// effect on a stream whose mode is already frozen; the response reports
/// the frozen mode so the caller can see that.
pub async fn set_override(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    state.catalog.set_redundancy_override(stream_id, req.mode).await?;
    let stream = state
        .catalog
        .get_stream(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    tracing::info!(
        stream_id = %stream_id,
        mode = req.mode.as_str(),
        frozen = stream.redundancy_mode.is_some(),
        "Redundancy override set"
    );
    Ok(Json(OverrideResponse {
        stream_id,
        override_mode: Some(req.mode),
        frozen_mode: stream.redundancy_mode,
    }))
}

/// DELETE /redundancy/override/:stream_id
pub async fn clear_override(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<OverrideResponse>, CoordinatorError> {
    let stream_id = parse_stream_id(&stream_id)?;
    state.catalog.clear_redundancy_override(stream_id).await?;
    let stream = state
        .catalog
        .get_stream(stream_id)
        .await?
        .ok_or(CoordinatorError::StreamNotFound(stream_id))?;
    Ok(Json(OverrideResponse {
        stream_id,
        override_mode: None,
        frozen_mode: stream.redundancy_mode,
    }))
}

/// GET /redundancy/efficiency — static parameter comparison.
pub async fn efficiency(State(state): State<AppState>) -> Json<EfficiencyResponse> {
    Json(EfficiencyResponse {
        replicated: RedundancyConfig::for_mode(RedundancyMode::Replicated),
        erasure: RedundancyConfig::for_mode(RedundancyMode::Erasure),
        expected_savings: state.policy.erasure_savings(),
    })
}

/// GET /redundancy/overhead — measured physical/logical storage ratio.
pub async fn overhead(
    State(state): State<AppState>,
) -> Result<Json<OverheadStats>, CoordinatorError> {
    Ok(Json(state.catalog.overhead_stats().await?))
}
