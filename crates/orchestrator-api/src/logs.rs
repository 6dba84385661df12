use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use orchestrator_types::LogData;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/logs", post(post_logs))
        .route("/metric_logs", post(post_metric_logs))
}

#[derive(Debug, Deserialize)]
struct LogsRequest {
    logs: Vec<LogData>,
}

async fn post_logs(State(state): State<AppState>, Json(req): Json<LogsRequest>) -> Result<(), ApiError> {
    state.dispatcher.add_entities_logs(req.logs).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MetricLogsRequest {
    logs: Vec<Value>,
}

/// Forwarded verbatim to the telemetry handler, no KV mutation.
async fn post_metric_logs(State(state): State<AppState>, Json(req): Json<MetricLogsRequest>) -> Result<(), ApiError> {
    state.dispatcher.forward_metric_logs(req.logs).await?;
    Ok(())
}
