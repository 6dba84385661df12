use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orchestrator_types::{Kernel, KernelKind, LogEntry};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/kernels", post(create_kernel))
        .route("/kernels/:request_uuid", get(get_kernel_logs))
        .route("/faas", post(create_faas))
        .route("/faas/:request_uuid", get(get_faas_logs))
}

#[derive(Debug, Deserialize)]
struct KernelRequest {
    #[serde(default)]
    request_uuid: Option<String>,
    kernel_name: String,
    data_description: Value,
}

/// `request_uuid` defaults to `data_description.bucket_id` when the caller
/// omits it (§4.3). FaaS submissions keep the client-supplied `request_uuid`
/// unconditionally: FaaS callers correlate result delivery by it.
fn resolve_kernel_request_uuid(req: &KernelRequest) -> Result<String, ApiError> {
    if let Some(uuid) = &req.request_uuid {
        return Ok(uuid.clone());
    }
    req.data_description
        .get("bucket_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::BadRequest("request_uuid or data_description.bucket_id is required".into()))
}

async fn create_kernel(State(state): State<AppState>, Json(req): Json<KernelRequest>) -> Result<Json<Kernel>, ApiError> {
    let request_uuid = resolve_kernel_request_uuid(&req)?;
    let kernel = Kernel::new(request_uuid, KernelKind::Kernel, req.kernel_name, req.data_description);
    let kernel = state.dispatcher.create_kernel(kernel).await?;
    Ok(Json(kernel))
}

async fn create_faas(State(state): State<AppState>, Json(req): Json<KernelRequest>) -> Result<Json<Kernel>, ApiError> {
    let request_uuid = req
        .request_uuid
        .clone()
        .ok_or_else(|| ApiError::BadRequest("request_uuid is required for a FaaS submission".into()))?;
    let kernel = Kernel::new(request_uuid, KernelKind::FaaS, req.kernel_name, req.data_description);
    let kernel = state.dispatcher.create_kernel(kernel).await?;
    Ok(Json(kernel))
}

async fn get_kernel_logs(State(state): State<AppState>, Path(request_uuid): Path<String>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.dispatcher.get_kernel_logs(&request_uuid).await?))
}

async fn get_faas_logs(State(state): State<AppState>, Path(request_uuid): Path<String>) -> Result<Json<Vec<LogEntry>>, ApiError> {
    Ok(Json(state.dispatcher.get_faas_logs(&request_uuid).await?))
}
