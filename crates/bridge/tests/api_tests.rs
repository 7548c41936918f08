//! Integration tests for the bridge API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bridge_lib::{
    engine::SinkSchedule,
    health::{components, HealthRegistry, POLL_FAILURES_UNHEALTHY},
    observability::BridgeMetrics,
    PollSource, Sink, SinkError, Snapshot, SourceError, SyncEngine,
};
use std::sync::Arc;
use telemetry_bridge::api::{create_router, AppState};
use tower::ServiceExt;

struct FixedSource;

#[async_trait]
impl PollSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        Ok(Snapshot::builder()
            .field("battery", 80)
            .field("speed", 0)
            .build())
    }
}

struct NamedSink {
    name: &'static str,
    fail: bool,
}

#[async_trait]
impl Sink for NamedSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn transmit(&self, _snapshot: &Snapshot) -> Result<(), SinkError> {
        if self.fail {
            Err(SinkError::Rejected("invalid token".into()))
        } else {
            Ok(())
        }
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<SyncEngine>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    health_registry.register(&components::sink("abrp")).await;
    health_registry
        .register(&components::sink("homeassistant"))
        .await;

    let metrics = BridgeMetrics::new();
    let engine = Arc::new(
        SyncEngine::builder()
            .source(Arc::new(FixedSource))
            .sink(
                Arc::new(NamedSink {
                    name: "abrp",
                    fail: false,
                }),
                SinkSchedule::default(),
            )
            .sink(
                Arc::new(NamedSink {
                    name: "homeassistant",
                    fail: true,
                }),
                SinkSchedule::default(),
            )
            .metrics(metrics.clone())
            .health(health_registry.clone())
            .build()
            .unwrap(),
    );

    let state = Arc::new(AppState::new(
        health_registry,
        metrics,
        engine.status_handle(),
    ));
    let router = create_router(state.clone());

    (router, state, engine)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _engine) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_sink_degraded() {
    let (app, _state, engine) = setup_test_app().await;

    // The failing sink degrades its component during the initial sync
    engine.initial_sync().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["sink:homeassistant"]["status"],
        "degraded"
    );
    assert_eq!(health["components"]["sink:abrp"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _engine) = setup_test_app().await;

    state
        .health_registry
        .poll_failed(POLL_FAILURES_UNHEALTHY, "Telemetry API unreachable")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_initial_sync() {
    let (app, _state, _engine) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _engine) = setup_test_app().await;

    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_status_before_first_poll() {
    let (app, _state, _engine) = setup_test_app().await;

    let (status, body) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 0);
    assert!(body.get("snapshot").is_none());
    assert_eq!(body["sinks"][0]["name"], "abrp");
    assert_eq!(body["sinks"][0]["dirty"], true);
}

#[tokio::test]
async fn test_status_after_initial_sync() {
    let (app, _state, engine) = setup_test_app().await;

    engine.initial_sync().await;

    let (status, body) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 1);
    assert_eq!(body["snapshot"]["fields"]["battery"], 80);

    let sinks = body["sinks"].as_array().unwrap();
    let abrp = sinks.iter().find(|s| s["name"] == "abrp").unwrap();
    assert_eq!(abrp["dirty"], false);
    assert_eq!(abrp["open"], true);

    let ha = sinks.iter().find(|s| s["name"] == "homeassistant").unwrap();
    assert_eq!(ha["dirty"], true);
    assert_eq!(ha["open"], false);
    assert_eq!(ha["consecutive_failures"], 1);
    assert!(ha["last_error"].as_str().unwrap().contains("invalid token"));
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, engine) = setup_test_app().await;

    engine.initial_sync().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();

    assert!(body.contains("telemetry_bridge_polls_total"));
    assert!(body.contains("telemetry_bridge_transmits_total"));
}
