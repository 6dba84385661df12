//! API Facade: the only HTTP surface every other component (human
//! operators, the Cluster Driver, the Notification Engine) mutates
//! entities through. The Manager is the one component that bypasses it,
//! holding direct KV credentials instead (§4.4).

mod assignments;
mod clusters;
mod deployments;
mod error;
mod grafana;
mod kernels;
mod logs;
mod monitoring;
mod notifications;
mod state;
mod storage_policies;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use orchestrator_dispatcher::Dispatcher;
use tower_http::trace::TraceLayer;

/// Builds the full router under the given path prefix (`api_base_url`'s
/// path component, conventionally `/api/v1/orchestrator`).
pub fn router(dispatcher: Dispatcher) -> Router {
    let state = AppState { dispatcher };

    Router::new()
        .merge(clusters::router())
        .merge(deployments::router())
        .merge(kernels::router())
        .merge(storage_policies::router())
        .merge(assignments::router())
        .merge(monitoring::router())
        .merge(logs::router())
        .merge(notifications::router())
        .merge(grafana::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use orchestrator_types::{Cluster, ClusterType, OrchestratorConfig};
    use std::sync::Arc;
    use storage::MemoryStorage;
    use tower::ServiceExt;

    fn test_dispatcher() -> Dispatcher {
        let config_json = r#"{
            "kv": {"host":"localhost","port":2379,"path":"./test-kv"},
            "broker": {"address":"localhost","username":"guest","password":"guest","vhost":"/"},
            "telemetry_endpoint": "http://localhost:9000",
            "secure_storage_endpoint": "http://localhost:9001",
            "secure_storage_token": "token",
            "rot_client_config_path": "/etc/serrano/rot.json",
            "api_base_url": "http://localhost:8080",
            "shap_value_threshold": 0.5,
            "heartbeat_secs": 30
        }"#;
        let config: OrchestratorConfig = serde_json::from_str(config_json).unwrap();
        Dispatcher::new(Arc::new(MemoryStorage::new()), config)
    }

    #[tokio::test]
    async fn create_then_fetch_cluster_round_trips_through_the_router() {
        let app = router(test_dispatcher());
        let cluster = Cluster::new("c1".into(), ClusterType::K8s, serde_json::json!({}));
        let body = serde_json::to_vec(&cluster).unwrap();

        let create = Request::post("/clusters").header("content-type", "application/json").body(Body::from(body)).unwrap();
        let resp = app.clone().oneshot(create).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let get = Request::get(format!("/clusters/{}", cluster.cluster_uuid)).body(Body::empty()).unwrap();
        let resp = app.oneshot(get).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fetching_an_unknown_cluster_is_a_404() {
        let app = router(test_dispatcher());
        let req = Request::get("/clusters/does-not-exist").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn creating_a_deployment_without_description_is_a_400() {
        let app = router(test_dispatcher());
        let req = Request::post("/deployments")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
