use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use orchestrator_dispatcher::DeploymentOverviewRow;
use orchestrator_types::Cluster;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/grafana/clusters", get(clusters))
        .route("/grafana/deployments", get(deployments))
}

async fn clusters(State(state): State<AppState>) -> Result<Json<Vec<Cluster>>, ApiError> {
    Ok(Json(state.dispatcher.grafana_clusters_overview().await?))
}

async fn deployments(State(state): State<AppState>) -> Result<Json<Vec<DeploymentOverviewRow>>, ApiError> {
    Ok(Json(state.dispatcher.grafana_deployments_overview().await?))
}
