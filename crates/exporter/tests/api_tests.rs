//! Integration tests for the exporter API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use exporter_lib::{
    health::{components, HealthRegistry},
    models::{CpuUsage, Entity, EntitySummary, NodeInfo, RawSnapshot, ResourceLimits},
    runtime::{async_trait, RuntimeClient},
    ReconciliationLoopBuilder, RuntimeError,
};
use prometheus::Registry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    health_registry.register(components::RUNTIME).await;

    let state = Arc::new(AppState::new(health_registry, Registry::new()));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// One container whose CPU counter grows by one second per list call
struct SingleContainer {
    ticks: AtomicU64,
}

#[async_trait]
impl RuntimeClient for SingleContainer {
    async fn list_entities(&self) -> Result<Vec<EntitySummary>, RuntimeError> {
        self.ticks.fetch_add(10_000_000, Ordering::SeqCst);
        Ok(vec![EntitySummary {
            id: "c0ffee".into(),
            name: "web".into(),
            image: "nginx".into(),
        }])
    }

    async fn inspect(&self, id: &str) -> Result<Entity, RuntimeError> {
        Ok(Entity {
            id: id.to_string(),
            name: "web".into(),
            image: "nginx".into(),
            labels: BTreeMap::from([("com.example.team".to_string(), "edge".to_string())]),
            limits: ResourceLimits::default(),
        })
    }

    async fn stats(&self, _id: &str) -> Result<RawSnapshot, RuntimeError> {
        Ok(RawSnapshot {
            read_at: Utc::now(),
            cpu: CpuUsage {
                total: self.ticks.load(Ordering::SeqCst),
                kernel: 0,
            },
            memory: Default::default(),
            storage: Default::default(),
            networks: BTreeMap::new(),
        })
    }

    async fn node_info(&self) -> Result<NodeInfo, RuntimeError> {
        Ok(NodeInfo {
            node_id: "n1".into(),
            node_name: "worker".into(),
            cpu_count: 2,
            total_memory_bytes: 1 << 30,
        })
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_runtime_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::RUNTIME, "list failed: connection refused")
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_poller_stopped() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::POLLER, "label cardinality mismatch")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_schema_frozen() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_container_series() {
    let health_registry = HealthRegistry::new();
    let registry = Registry::new();
    let mut reconciler = ReconciliationLoopBuilder::new()
        .runtime(Arc::new(SingleContainer {
            ticks: AtomicU64::new(0),
        }))
        .registry(registry.clone())
        .health(health_registry.clone())
        .build()
        .unwrap();
    reconciler.seed().await.unwrap();
    reconciler.run_cycle().await.unwrap();

    let state = Arc::new(AppState::new(health_registry, registry));
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("# TYPE container_cpu_usage_seconds_total counter"));
    assert!(text.contains("container_label_com_example_team=\"edge\""));
    assert!(text.contains("id=\"/docker/c0ffee\""));
    assert!(text.contains("machine_cpu_cores"));
    assert!(text.contains("host_meta"));
    assert!(text.contains("stats_exporter_cycle_duration_seconds_bucket"));
}

#[tokio::test]
async fn test_metrics_endpoint_on_empty_registry() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
