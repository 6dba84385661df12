use axum::extract::{Path, State};
use axum::{Json, Router};
use orchestrator_types::{Assignment, Bundle};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assignments/:cluster_uuid/assignment/:assignment_uuid", axum::routing::get(get_assignment))
        .route("/bundles/:bundle_uuid", axum::routing::get(get_bundle))
}

async fn get_assignment(
    State(state): State<AppState>,
    Path((cluster_uuid, assignment_uuid)): Path<(String, String)>,
) -> Result<Json<Assignment>, ApiError> {
    match state.dispatcher.get_assignment(&cluster_uuid, &assignment_uuid).await? {
        Some(assignment) => Ok(Json(assignment)),
        None => Err(ApiError::NotFound(format!("assignment {assignment_uuid} not found on cluster {cluster_uuid}"))),
    }
}

async fn get_bundle(State(state): State<AppState>, Path(bundle_uuid): Path<String>) -> Result<Json<Bundle>, ApiError> {
    match state.dispatcher.get_bundle(&bundle_uuid).await? {
        Some(bundle) => Ok(Json(bundle)),
        None => Err(ApiError::NotFound(format!("bundle {bundle_uuid} not found"))),
    }
}
