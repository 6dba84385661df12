use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use orchestrator_types::NotificationEvent;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ede_notification", post(post_notification))
}

async fn post_notification(State(state): State<AppState>, Json(event): Json<NotificationEvent>) -> Result<(), ApiError> {
    state.dispatcher.handle_notification_evt(event).await?;
    Ok(())
}
