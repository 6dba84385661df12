use axum::extract::{Query, State};
use axum::routing::put;
use axum::{Json, Router};
use orchestrator_types::{AssignmentMonitoringData, Monitoring};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/monitoring", put(put_monitoring).get(get_monitoring))
}

async fn put_monitoring(State(state): State<AppState>, Json(data): Json<AssignmentMonitoringData>) -> Result<(), ApiError> {
    state.dispatcher.put_assignment_monitoring_data(data).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MonitoringQuery {
    cluster_uuid: String,
}

/// Crash-recovery hydration the Driver calls at boot
/// (`orchestrator_driver::api_client::get_monitoring_for_cluster`):
/// every Monitoring entry that already lists this cluster.
async fn get_monitoring(State(state): State<AppState>, Query(q): Query<MonitoringQuery>) -> Result<Json<Vec<Monitoring>>, ApiError> {
    let all = state.dispatcher.get_deployments_monitoring_data().await?;
    let filtered = all.into_iter().filter(|m| m.clusters.contains(&q.cluster_uuid)).collect();
    Ok(Json(filtered))
}
