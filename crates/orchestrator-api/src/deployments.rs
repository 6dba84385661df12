use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use orchestrator_dispatcher::ServiceStatus;
use orchestrator_types::{Deployment, LogEntry};
use serde::Deserialize;
use storage::StorageBackend;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deployments", get(list).post(create))
        .route("/deployments/:deployment_uuid", get(get_one).put(update).delete(remove))
        .route("/deployments/logs/:deployment_uuid", get(logs))
        .route("/deployments/services/:deployment_uuid", get(services))
}

#[derive(Debug, Deserialize)]
struct CreateDeploymentRequest {
    #[serde(default)]
    deployment_uuid: Option<String>,
    deployment_description: String,
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<Deployment>>, ApiError> {
    let keys = state.dispatcher.store().list_keys(orchestrator_types::keys::DEPLOYMENTS_PREFIX).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut deployments = Vec::with_capacity(keys.len());
    for key in keys {
        let uuid = orchestrator_types::keys::last_segment(&key);
        if let Some(deployment) = state.dispatcher.get_deployment(uuid).await? {
            deployments.push(deployment);
        }
    }
    Ok(Json(deployments))
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateDeploymentRequest>) -> Result<Json<Deployment>, ApiError> {
    let deployment_uuid = req.deployment_uuid.unwrap_or_else(|| Uuid::new_v4().to_string());
    let deployment = state.dispatcher.create_deployment(deployment_uuid, req.deployment_description).await?;
    Ok(Json(deployment))
}

async fn get_one(State(state): State<AppState>, Path(deployment_uuid): Path<String>) -> Result<Json<Deployment>, ApiError> {
    match state.dispatcher.get_deployment(&deployment_uuid).await? {
        Some(deployment) => Ok(Json(deployment)),
        None => Err(ApiError::NotFound(format!("deployment {deployment_uuid} not found"))),
    }
}

async fn update(State(state): State<AppState>, Path(deployment_uuid): Path<String>, Json(mut deployment): Json<Deployment>) -> Result<Json<Deployment>, ApiError> {
    if deployment.deployment_uuid != deployment_uuid {
        return Err(ApiError::BadRequest("deployment_uuid in body does not match path".into()));
    }
    deployment.logs.push(LogEntry::now("deployment updated"));
    let deployment = state.dispatcher.update_deployment(deployment).await?;
    Ok(Json(deployment))
}

async fn remove(State(state): State<AppState>, Path(deployment_uuid): Path<String>) -> Result<(), ApiError> {
    let deleted = state.dispatcher.delete_deployment(&deployment_uuid).await?;
    if deleted {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("deployment {deployment_uuid} not found")))
    }
}

async fn logs(State(state): State<AppState>, Path(deployment_uuid): Path<String>) -> Result<Json<Vec<LogEntry>>, ApiError> {
    Ok(Json(state.dispatcher.get_deployment_logs(&deployment_uuid).await?))
}

async fn services(State(state): State<AppState>, Path(deployment_uuid): Path<String>) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    Ok(Json(state.dispatcher.get_deployment_services(&deployment_uuid).await?))
}
