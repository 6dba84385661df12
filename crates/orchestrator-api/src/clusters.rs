use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use orchestrator_types::Cluster;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clusters", get(list).post(create))
        .route("/clusters/:cluster_uuid", get(get_one).put(update).delete(remove))
        .route("/clusters/health/:cluster_uuid", get(heartbeat))
}

#[derive(Debug, Deserialize)]
struct ActiveQuery {
    active: Option<String>,
}

async fn list(State(state): State<AppState>, Query(q): Query<ActiveQuery>) -> Result<Json<Vec<Cluster>>, ApiError> {
    let clusters = state.dispatcher.get_clusters(q.active.as_deref()).await?;
    Ok(Json(clusters))
}

async fn create(State(state): State<AppState>, Json(cluster): Json<Cluster>) -> Result<Json<Cluster>, ApiError> {
    let cluster = state.dispatcher.set_cluster(cluster).await?;
    Ok(Json(cluster))
}

async fn update(State(state): State<AppState>, Path(cluster_uuid): Path<String>, Json(mut cluster): Json<Cluster>) -> Result<Json<Cluster>, ApiError> {
    if cluster.cluster_uuid.is_empty() {
        cluster.cluster_uuid = cluster_uuid;
    } else if cluster.cluster_uuid != cluster_uuid {
        return Err(ApiError::BadRequest("cluster_uuid in body does not match path".into()));
    }
    let cluster = state.dispatcher.set_cluster(cluster).await?;
    Ok(Json(cluster))
}

async fn get_one(State(state): State<AppState>, Path(cluster_uuid): Path<String>) -> Result<Json<Cluster>, ApiError> {
    match state.dispatcher.get_cluster(&cluster_uuid).await? {
        Some(cluster) => Ok(Json(cluster)),
        None => Err(ApiError::NotFound(format!("cluster {cluster_uuid} not found"))),
    }
}

async fn remove(State(state): State<AppState>, Path(cluster_uuid): Path<String>) -> Result<(), ApiError> {
    state.dispatcher.delete_cluster(&cluster_uuid).await?;
    Ok(())
}

async fn heartbeat(State(state): State<AppState>, Path(cluster_uuid): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let timestamp = state.dispatcher.heartbeat(&cluster_uuid).await?;
    Ok(Json(serde_json::json!({ "cluster_uuid": cluster_uuid, "timestamp": timestamp })))
}
