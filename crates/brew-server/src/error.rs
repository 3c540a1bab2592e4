//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use brew_core::{KettleError, Response as Envelope};
use brew_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Kettle(#[from] KettleError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Kettle(_) | Self::Store(StoreError::KettleNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Backend(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kettle(e) => e.error_kind(),
            Self::Store(StoreError::KettleNotFound(_)) => "not_found",
            Self::Store(StoreError::Backend(_)) => "store_unavailable",
            Self::Invalid(_) => "invalid_request",
        }
    }
}

/// Errors use the same `{"status":"error","msg":...}` envelope as the socket.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.kind(), error = %self, "request failed");
        } else {
            debug!(kind = self.kind(), error = %self, "request rejected");
        }
        (status, Json(Envelope::error(self.to_string()))).into_response()
    }
}
