use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kongossa_shared::WireError;
use kongossa_store::StoreError;
use kongossa_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<WireError> for NodeError {
    fn from(e: WireError) -> Self {
        NodeError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Wire(e) => NodeError::BadRequest(e.to_string()),
            StoreError::Serialization(e) => NodeError::BadRequest(e.to_string()),
            StoreError::DuplicateMessage(id) => {
                NodeError::Conflict(format!("message {id} already exists"))
            }
            StoreError::UnknownTunnel(id) => NodeError::NotFound(format!("tunnel {id}")),
            other => NodeError::Internal(other.to_string()),
        }
    }
}

impl From<SyncError> for NodeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidPeerUrl(_) => NodeError::BadRequest(e.to_string()),
            SyncError::Store(e) => e.into(),
            other => NodeError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            NodeError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            NodeError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            NodeError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            NodeError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            NodeError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
