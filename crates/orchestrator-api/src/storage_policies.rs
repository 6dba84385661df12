use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use orchestrator_types::StoragePolicy;
use storage::StorageBackend;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/storage_policies", get(list).post(create))
        .route("/storage_policies/:policy_uuid", get(get_one).put(update).delete(remove))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<StoragePolicy>>, ApiError> {
    let keys = state
        .dispatcher
        .store()
        .list_keys(orchestrator_types::keys::STORAGE_POLICIES_PREFIX)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut policies = Vec::with_capacity(keys.len());
    for key in keys {
        let uuid = orchestrator_types::keys::last_segment(&key);
        if let Some(policy) = state.dispatcher.get_storage_policy(uuid).await? {
            policies.push(policy);
        }
    }
    Ok(Json(policies))
}

async fn create(State(state): State<AppState>, Json(policy): Json<StoragePolicy>) -> Result<Json<StoragePolicy>, ApiError> {
    let policy = state.dispatcher.create_storage_policy(policy).await?;
    Ok(Json(policy))
}

async fn get_one(State(state): State<AppState>, Path(policy_uuid): Path<String>) -> Result<Json<StoragePolicy>, ApiError> {
    match state.dispatcher.get_storage_policy(&policy_uuid).await? {
        Some(policy) => Ok(Json(policy)),
        None => Err(ApiError::NotFound(format!("storage policy {policy_uuid} not found"))),
    }
}

/// Preserves `cc_policy_id` via [`orchestrator_dispatcher::Dispatcher::update_storage_policy`]
/// even when the caller's body zeroes it.
async fn update(State(state): State<AppState>, Path(policy_uuid): Path<String>, Json(mut policy): Json<StoragePolicy>) -> Result<Json<StoragePolicy>, ApiError> {
    if policy.policy_uuid != policy_uuid {
        return Err(ApiError::BadRequest("policy_uuid in body does not match path".into()));
    }
    policy.policy_uuid = policy_uuid;
    let policy = state.dispatcher.update_storage_policy(policy).await?;
    Ok(Json(policy))
}

async fn remove(State(state): State<AppState>, Path(policy_uuid): Path<String>) -> Result<(), ApiError> {
    let deleted = state.dispatcher.delete_storage_policy(&policy_uuid).await?;
    if deleted {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("storage policy {policy_uuid} not found")))
    }
}
