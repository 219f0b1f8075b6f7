use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use nshift_config::ConfigStore;
use nshift_driver::DriverRegistry;
use nshift_orchestrator::Orchestrator;
use nshift_store::HistoryStore;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    config: Arc<ConfigStore>,
    store: Arc<dyn HistoryStore>,
    orchestrator: Arc<Orchestrator>,
    drivers: Arc<DriverRegistry>,
    auth_token: Arc<String>,
) -> Router {
    let state = AppState { config, store, orchestrator, drivers, auth_token };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/scan", post(handlers::post_scan))
        .route("/scan/:schedule_id", post(handlers::post_scan_schedule))
        .route("/executions", get(handlers::list_executions))
        .route("/audit", get(handlers::list_audit))
        .route("/status", get(handlers::status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use nshift_domain::{ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials};
    use nshift_driver::{AwsApiClient, CredentialBroker, Driver, DriverError};
    use nshift_store::InMemoryHistoryStore;
    use std::io::Write;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    struct StubVmDriver;

    #[async_trait]
    impl Driver for StubVmDriver {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Vm
        }

        async fn process(
            &self,
            resource: &ResourceReference,
            _schedule: &Schedule,
            action: ActionKind,
            _creds: &SessionCredentials,
            _meta: &serde_json::Value,
            _prior_state: Option<&serde_json::Value>,
        ) -> Result<ResourceActionResult, DriverError> {
            Ok(ResourceActionResult::success(resource.canonical_id.clone(), resource.id.clone(), action, serde_json::json!({})))
        }
    }

    async fn test_app() -> (Router, TempDir) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("schedules")).unwrap();
        std::fs::create_dir_all(tmp.path().join("accounts")).unwrap();

        let config = Arc::new(ConfigStore::new(tmp.path()));
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(StubVmDriver));
        let drivers = Arc::new(registry);
        let credentials = Arc::new(CredentialBroker::new(AwsApiClient::new()).await);
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), store.clone(), drivers.clone(), credentials));

        let app = build_app(config, store, orchestrator, drivers, Arc::new(TEST_TOKEN.to_string()));
        (app, tmp)
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    fn write_file(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let (app, _tmp) = test_app().await;
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let (app, _tmp) = test_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (app, _tmp) = test_app().await;
        let resp = app.oneshot(authed(Request::builder().uri("/health")).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_returns_200_with_empty_config() {
        let (app, _tmp) = test_app().await;
        let resp = app.oneshot(authed(Request::builder().uri("/ready")).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_returns_200() {
        let (app, _tmp) = test_app().await;
        let resp = app.oneshot(authed(Request::builder().uri("/status")).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scan_schedule_not_found_returns_404() {
        let (app, _tmp) = test_app().await;
        let body = serde_json::json!({ "tenantId": "acme", "triggerSource": "on-demand" });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/scan/nope").header("content-type", "application/json"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn executions_query_returns_empty_list() {
        let (app, _tmp) = test_app().await;
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/executions?schedule_id=none&tenant_id=acme"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_scan_over_http_persists_execution() {
        let (app, tmp) = test_app().await;
        write_file(
            tmp.path(),
            "schedules/always-stop.yml",
            r#"
id: always-stop
name: Always stop
tenant_id: acme
start_hms: "00:00:00"
end_hms: "00:00:01"
timezone: UTC
active_days: [mon, tue, wed, thu, fri, sat, sun]
resources:
  - id: web-1
    canonical_id: "arn:nightshift:ec2:us-east-1:123456789012:instance/i-0abc123"
"#,
        );
        write_file(
            tmp.path(),
            "accounts/prod.yml",
            r#"
id: "123456789012"
display_name: Production
role_id: nshift-executor
regions: [us-east-1]
"#,
        );

        let body = serde_json::json!({ "triggerSource": "periodic" });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/scan").header("content-type", "application/json"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
