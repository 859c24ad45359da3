//! Coordinator HTTP handlers, grouped by resource.

pub mod chunks;
pub mod nodes;
pub mod redundancy;
pub mod streams;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use chunkvault_core::StreamId;

use crate::error::CoordinatorError;

impl CoordinatorError {
    fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::StreamNotFound(_)
            | CoordinatorError::ChunkNotFound(_)
            | CoordinatorError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::InvalidRequest(_)
            | CoordinatorError::InsufficientReplicas(_)
            | CoordinatorError::Core(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::QuorumNotReached { .. }
            | CoordinatorError::BallotConflict { .. } => StatusCode::CONFLICT,
            CoordinatorError::CorruptRow(_)
            | CoordinatorError::Database(_)
            | CoordinatorError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
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

/// Parse a stream id path segment.
pub(crate) fn parse_stream_id(raw: &str) -> Result<StreamId, CoordinatorError> {
    StreamId::parse(raw)
        .map_err(|_| CoordinatorError::InvalidRequest(format!("invalid stream id {raw:?}")))
}
