//! API module - HTTP surface over the memory orchestrator

pub mod memory_api;
pub mod insight_api;
pub mod status_api;

pub use memory_api::{chain, get_related, paths, recall, reflect, relate, remember};
pub use insight_api::{mark_shown, pending_insights, run_insights};
pub use status_api::{healthz, status};

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::error::MemoryError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "code": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        let status = match &e {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            MemoryError::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_adapter_failure() => StatusCode::BAD_GATEWAY,
            _ => {
                error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let status = |e: MemoryError| ApiError::from(e).status;
        assert_eq!(status(MemoryError::InvalidStrength(2.0)), StatusCode::BAD_REQUEST);
        assert_eq!(status(MemoryError::InvalidId(" ".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(MemoryError::not_found("insight", "9")), StatusCode::NOT_FOUND);
        assert_eq!(status(MemoryError::Storage("disk full".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status(MemoryError::AdapterUnavailable("vector".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
