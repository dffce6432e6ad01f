/// Integration tests for the session ingestion HTTP API
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use futures::future::BoxFuture;
use httpmock::prelude::*;
use log_sage::{
    config::{Config, NotifyConfig},
    dispatcher::Analyzer,
    handlers::sessions::{IngestResponse, IngestState, MAX_SOURCE_FIELD_BYTES},
    notify::WebhookNotifier,
    server::create_router,
    AnalysisError, AnalysisService,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

struct FixedAnalyzer {
    calls: AtomicUsize,
}

impl Analyzer for FixedAnalyzer {
    fn analyze(&self, _prompt: String) -> BoxFuture<'_, Result<String, AnalysisError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok("root cause: pool exhausted".to_string()) })
    }
}

fn test_app(notifier: Option<WebhookNotifier>) -> (Router, Arc<FixedAnalyzer>) {
    let mut config = Config::default();
    config.provider.api_key = "sk-test".to_string();

    let analyzer = Arc::new(FixedAnalyzer {
        calls: AtomicUsize::new(0),
    });
    let service = AnalysisService::builder(config.clone())
        .analyzer(analyzer.clone())
        .build()
        .unwrap();

    let router = create_router(&config, IngestState { service, notifier }, None);
    (router, analyzer)
}

fn ingest_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/sessions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app(None);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_ingest_with_error_is_accepted_and_dispatched() {
    let (app, analyzer) = test_app(None);
    let session_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(ingest_request(json!({
            "session_id": session_id,
            "source": {"file": "app/orders.py", "function": "create_order"},
            "tags": {"ENV": "production"},
            "entries": [
                {"level": "INFO", "message": "request received"},
                {"level": "info", "message": "   "},
                {"level": "ERROR", "message": "db timeout"}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: IngestResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(body.session_id, session_id);
    assert_eq!(body.entries, 2);
    assert!(body.dispatched);

    let deadline = Instant::now() + Duration::from_secs(5);
    while analyzer.calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "analysis never dispatched");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_ingest_without_error_is_not_dispatched() {
    let (app, analyzer) = test_app(None);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": "app/orders.py", "function": "list_orders"},
            "entries": [{"level": "WARN", "message": "slow query"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["entries"], 1);
    assert_eq!(body["dispatched"], false);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ingest_rejects_unknown_level() {
    let (app, _) = test_app(None);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": "app.py", "function": "main"},
            "entries": [{"level": "FATAL", "message": "boom"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "bad_request");
}

#[tokio::test]
async fn test_ingest_rejects_submitted_analysis() {
    let (app, _) = test_app(None);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": "app.py", "function": "main"},
            "entries": [{"level": "ANALYSIS", "message": "forged"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_requires_source() {
    let (app, _) = test_app(None);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": " ", "function": ""},
            "entries": []
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_rejects_oversized_source_fields() {
    let (app, analyzer) = test_app(None);

    let response = app
        .clone()
        .oneshot(ingest_request(json!({
            "source": {"file": "a".repeat(MAX_SOURCE_FIELD_BYTES + 1), "function": "main"},
            "entries": [{"level": "ERROR", "message": "boom"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": "app.py", "function": "f".repeat(MAX_SOURCE_FIELD_BYTES + 1)},
            "entries": [{"level": "ERROR", "message": "boom"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analysis_is_delivered_to_webhook() {
    let hook = MockServer::start_async().await;
    let mock = hook
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hooks/analysis")
                .body_includes("root cause: pool exhausted")
                .body_includes("create_order");
            then.status(204);
        })
        .await;

    let notifier = WebhookNotifier::from_config(
        reqwest::Client::new(),
        &NotifyConfig {
            webhook_url: Some(hook.url("/hooks/analysis")),
            timeout_seconds: 5,
        },
    );
    let (app, _) = test_app(notifier);

    let response = app
        .oneshot(ingest_request(json!({
            "source": {"file": "app/orders.py", "function": "create_order"},
            "entries": [{"level": "ERROR", "message": "db timeout"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let deadline = Instant::now() + Duration::from_secs(5);
    while mock.calls_async().await == 0 {
        assert!(Instant::now() < deadline, "webhook never called");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    mock.assert_calls_async(1).await;
}
