//! Shared HTTP error mapping for every handler, grounded in the
//! `OrchestrationError`/`IntoResponse` pattern (see
//! `other_examples/f699e096_visiquate-cco__...orchestration_routes.rs.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_dispatcher::DispatcherError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Collaborator(String),
    Internal(String),
}

impl From<DispatcherError> for ApiError {
    fn from(err: DispatcherError) -> Self {
        match err {
            DispatcherError::NotFound(msg) => ApiError::NotFound(msg),
            DispatcherError::InvalidActiveFilter(msg) => ApiError::BadRequest(msg),
            DispatcherError::Telemetry(err) => ApiError::Collaborator(err.to_string()),
            DispatcherError::Storage(err) => ApiError::Internal(err.to_string()),
            DispatcherError::Serialization(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Collaborator(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
