//! Chunk placement endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use chunkvault_core::{ChunkId, RedundancyMode};

use crate::catalog::{Catalog, FragmentRecord, ProposalPhase, ProposalRecord};
use crate::error::CoordinatorError;
use crate::models::{CommitRequest, CommitResponse};
use crate::placement::PlacementRequest;
use crate::AppState;

fn parse_chunk_id(raw: &str) -> Result<ChunkId, CoordinatorError> {
    ChunkId::parse(raw)
        .map_err(|_| CoordinatorError::InvalidRequest(format!("invalid chunk id {raw:?}")))
}

/// POST /chunks/:chunk_id/commit
pub async fn commit_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, CoordinatorError> {
    let chunk_id = parse_chunk_id(&chunk_id)?;

    if state.catalog.get_stream(req.stream_id).await?.is_none() {
        return Err(CoordinatorError::StreamNotFound(req.stream_id));
    }

    match req.redundancy_mode {
        RedundancyMode::Replicated if req.node_urls.is_empty() => {
            return Err(CoordinatorError::InvalidRequest(
                "replicated commit requires node_urls".to_string(),
            ));
        }
        RedundancyMode::Erasure if req.fragments.is_empty() => {
            return Err(CoordinatorError::InvalidRequest(
                "erasure commit requires fragments".to_string(),
            ));
        }
        _ => {}
    }

    let outcome = state
        .placement
        .propose(PlacementRequest {
            chunk_id,
            stream_id: req.stream_id,
            sequence: req.sequence_num,
            size_bytes: req.size_bytes,
            hash: req.hash,
            mode: req.redundancy_mode,
            node_urls: req.node_urls,
            fragments: req.fragments,
        })
        .await?;

    let message = if outcome.already_committed {
        "already committed".to_string()
    } else {
        format!("committed on {} nodes", outcome.committed_nodes.len())
    };
    Ok(Json(CommitResponse {
        success: true,
        committed_nodes: outcome.committed_nodes,
        ballot: outcome.ballot,
        message,
    }))
}

/// GET /chunks/:chunk_id/fragments
pub async fn get_fragments(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Json<Vec<FragmentRecord>>, CoordinatorError> {
    let chunk_id = parse_chunk_id(&chunk_id)?;
    if state.catalog.get_chunk(&chunk_id).await?.is_none() {
        return Err(CoordinatorError::ChunkNotFound(chunk_id));
    }
    let fragments = state.catalog.get_fragments(&chunk_id).await?;
    Ok(Json(fragments))
}

/// GET /chunks/:chunk_id/proposal — placement consensus state. A chunk
/// nobody has proposed yet reports phase `none`.
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Json<ProposalRecord>, CoordinatorError> {
    let chunk_id = parse_chunk_id(&chunk_id)?;
    let proposal = state
        .catalog
        .get_proposal(&chunk_id)
        .await?
        .unwrap_or(ProposalRecord {
            chunk_id,
            promised_ballot: 0,
            accepted_ballot: 0,
            accepted_value: None,
            phase: ProposalPhase::None,
        });
    Ok(Json(proposal))
}
