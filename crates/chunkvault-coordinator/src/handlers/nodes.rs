//! Node registry endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use chunkvault_core::{NodeId, NodeUrl};

use crate::catalog::{Catalog, NodeRecord, NodeState, NodeSummary};
use crate::error::CoordinatorError;
use crate::models::{
    CoordinatorHealthResponse, HeartbeatRequest, RegisterNodeRequest, RegisterNodeResponse,
};
use crate::AppState;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// POST /nodes/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, CoordinatorError> {
    if req.node_url.is_empty() || req.node_id.is_empty() {
        return Err(CoordinatorError::InvalidRequest(
            "node_url and node_id are required".to_string(),
        ));
    }
    let node_url = NodeUrl::new(req.node_url);
    let node_id = NodeId::new(req.node_id);
    state
        .catalog
        .register_node(&node_url, &node_id, req.version.as_deref().unwrap_or("unknown"))
        .await?;
    tracing::info!(node_id = %node_id, node_url = %node_url, "Node registered");
    Ok(Json(RegisterNodeResponse {
        node_id: node_id.to_string(),
        node_url: node_url.to_string(),
    }))
}

/// POST /nodes/:node_id/heartbeat — rejected for unregistered ids.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, CoordinatorError> {
    if !(0.0..=1.0).contains(&req.disk_usage) {
        return Err(CoordinatorError::InvalidRequest(format!(
            "disk_usage must be a fraction in [0,1], got {}",
            req.disk_usage
        )));
    }
    let node_id = NodeId::new(node_id);
    state
        .catalog
        .heartbeat(&node_id, req.disk_usage, req.chunk_count)
        .await?;
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}

/// GET /nodes/healthy — fresh heartbeat and usage below warning.
pub async fn healthy_nodes(
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeRecord>>, CoordinatorError> {
    let nodes = state
        .catalog
        .healthy_nodes(
            now_ms(),
            state.config.node_timeout.as_millis() as i64,
            crate::redundancy::DISK_USAGE_WARN,
        )
        .await?;
    Ok(Json(nodes))
}

/// GET /nodes — every registered node with derived state.
pub async fn list_nodes(
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeRecord>>, CoordinatorError> {
    let nodes = state
        .catalog
        .list_nodes(now_ms(), state.config.node_timeout.as_millis() as i64)
        .await?;
    Ok(Json(nodes))
}

/// GET /nodes/summary
pub async fn summary(State(state): State<AppState>) -> Result<Json<NodeSummary>, CoordinatorError> {
    let nodes = state
        .catalog
        .list_nodes(now_ms(), state.config.node_timeout.as_millis() as i64)
        .await?;
    let mut summary = NodeSummary {
        total: nodes.len() as u64,
        healthy: 0,
        degraded: 0,
        down: 0,
    };
    for node in &nodes {
        match node.state {
            NodeState::Healthy => summary.healthy += 1,
            NodeState::Degraded => summary.degraded += 1,
            NodeState::Down => summary.down += 1,
        }
    }
    Ok(Json(summary))
}

/// GET /health — coordinator service health.
pub async fn health(State(state): State<AppState>) -> Json<CoordinatorHealthResponse> {
    let timeout_ms = state.config.node_timeout.as_millis() as i64;
    let (database_status, nodes) = match state.catalog.list_nodes(now_ms(), timeout_ms).await {
        Ok(nodes) => ("connected".to_string(), nodes),
        Err(e) => {
            tracing::error!(error = %e, "Catalog unavailable in health check");
            ("error".to_string(), Vec::new())
        }
    };
    let healthy = nodes
        .iter()
        .filter(|n| n.state == NodeState::Healthy)
        .count() as u64;
    Json(CoordinatorHealthResponse {
        status: if database_status == "connected" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        service: "chunkvault-coordinator".to_string(),
        healthy_nodes: healthy,
        total_nodes: nodes.len() as u64,
        database_status,
    })
}
