//! Integration tests for the query API endpoints

use aqi_lib::{
    health::{components, HealthRegistry},
    ingest::StreamState,
    predictor::{
        default_feature_columns, ClassScores, Classifier, DeploymentParams, FixedClock,
        LabelDecoder, ModelArtifacts, PredictionEngine, ScalerParams,
    },
    InferenceError, PredictionResult, SharedState,
};
use aqi_server::api::{create_router, AppState};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::DateTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

/// Fixed distribution over three classes, always picking the first
struct GoldenClassifier;

impl Classifier for GoldenClassifier {
    fn predict(&self, _features: &[f64]) -> Result<ClassScores, InferenceError> {
        Ok(ClassScores {
            class_index: 0,
            probabilities: vec![0.85, 0.1, 0.05],
        })
    }
}

/// Passes the probe, then fails every real request
struct FailingClassifier {
    calls: std::sync::atomic::AtomicUsize,
}

impl Classifier for FailingClassifier {
    fn predict(&self, _features: &[f64]) -> Result<ClassScores, InferenceError> {
        if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            return Ok(ClassScores {
                class_index: 0,
                probabilities: vec![0.85, 0.1, 0.05],
            });
        }
        Err(InferenceError::Model("session poisoned".to_string()))
    }
}

const TIMESTAMP: &str = "2024-03-15T10:30:00+07:00";

fn engine_with(classifier: Box<dyn Classifier>) -> PredictionEngine {
    let columns = default_feature_columns();
    let n = columns.len();
    let params = DeploymentParams {
        aqi_bin_10_edges: Some((0..=10).map(|i| i as f64 * 50.0).collect()),
        aqi_bin_20_edges: Some((0..=20).map(|i| i as f64 * 25.0).collect()),
        outlier_lower_bound: Some(10.0),
        outlier_upper_bound: Some(200.0),
    };
    let artifacts = ModelArtifacts::from_parts(
        classifier,
        Box::new(ScalerParams::Standard {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        }),
        params,
        columns,
        LabelDecoder::new(vec![
            "Good".to_string(),
            "Moderate".to_string(),
            "Unhealthy".to_string(),
        ]),
    )
    .unwrap();
    let clock = FixedClock(DateTime::parse_from_rfc3339(TIMESTAMP).unwrap());
    PredictionEngine::with_clock(artifacts, Arc::new(clock))
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    stream_tx: watch::Sender<StreamState>,
}

async fn setup_test_app(engine: PredictionEngine) -> TestApp {
    let health_registry = HealthRegistry::new();
    if engine.is_available() {
        health_registry.register(components::MODEL).await;
    } else {
        health_registry
            .set_degraded(components::MODEL, "missing required model files")
            .await;
    }
    health_registry.register(components::STREAM).await;

    let (stream_tx, stream_rx) = watch::channel(StreamState::Subscribed);
    let state = Arc::new(AppState::new(
        Arc::new(engine),
        SharedState::new(),
        health_registry,
        stream_rx,
    ));
    TestApp {
        router: create_router(Arc::clone(&state)),
        state,
        stream_tx,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_predict(router: &Router, body: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/predict")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn stored_result(aqi: f64) -> PredictionResult {
    PredictionResult {
        aqi_value: aqi,
        predicted_status: "Good".to_string(),
        class_probabilities: BTreeMap::from([
            ("Good".to_string(), 0.9),
            ("Moderate".to_string(), 0.1),
        ]),
        timestamp: DateTime::parse_from_rfc3339(TIMESTAMP).unwrap(),
    }
}

#[tokio::test]
async fn test_predict_golden_response() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;

    let (status, body) = post_predict(&app.router, r#"{"AQI": 50}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aqi"], 50.0);
    assert_eq!(body["predicted_status"], "Good");
    assert_eq!(body["probabilities"]["Good"], 0.85);
    assert_eq!(body["probabilities"]["Moderate"], 0.1);
    assert_eq!(body["probabilities"]["Unhealthy"], 0.05);
    assert!(body["timestamp"]
        .as_str()
        .unwrap()
        .starts_with("2024-03-15T10:30:00"));

    // On-demand predictions bypass the shared history
    assert!(app.state.state.is_empty());
}

#[tokio::test]
async fn test_predict_accepts_numeric_string() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    let (status, body) = post_predict(&app.router, r#"{"AQI": "120"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aqi"], 120.0);
}

#[tokio::test]
async fn test_predict_missing_field_is_400() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;

    for body in [r#"{"PM25": 10}"#, "not json", ""] {
        let (status, json) = post_predict(&app.router, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
        assert_eq!(json["error"], "Missing 'AQI' field in request");
    }
}

#[tokio::test]
async fn test_predict_validation_error_is_500_with_kind() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;

    let (status, body) = post_predict(&app.router, r#"{"AQI": "very bad"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "validation");

    let (status, body) = post_predict(&app.router, r#"{"AQI": -12}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_predict_inference_error_is_500() {
    let classifier = FailingClassifier {
        calls: std::sync::atomic::AtomicUsize::new(0),
    };
    let app = setup_test_app(engine_with(Box::new(classifier))).await;

    let (status, body) = post_predict(&app.router, r#"{"AQI": 50}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "inference");
    assert!(body["error"].as_str().unwrap().contains("session poisoned"));
}

#[tokio::test]
async fn test_predict_without_model_is_500_with_kind() {
    let app = setup_test_app(PredictionEngine::unavailable("missing required model files")).await;

    let (status, body) = post_predict(&app.router, r#"{"AQI": 50}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "model_unavailable");
}

#[tokio::test]
async fn test_latest_404_when_empty() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    let (status, body) = get(&app.router, "/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No predictions received yet");
}

#[tokio::test]
async fn test_latest_returns_most_recent() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    app.state.state.publish(stored_result(12.0));
    app.state.state.publish(stored_result(34.0));

    let (status, body) = get(&app.router, "/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aqi"], 34.0);
    assert_eq!(body["probabilities"]["Good"], 0.9);
}

#[tokio::test]
async fn test_history_limits() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    for n in 1..=15 {
        app.state.state.publish(stored_result(n as f64));
    }

    let (status, body) = get(&app.router, "/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 10);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.first().unwrap()["aqi"], 6.0);
    assert_eq!(history.last().unwrap()["aqi"], 15.0);

    let (_, body) = get(&app.router, "/history?limit=3").await;
    assert_eq!(body["count"], 3);
    assert_eq!(body["history"][0]["aqi"], 13.0);

    let (_, body) = get(&app.router, "/history?limit=500").await;
    assert_eq!(body["count"], 15);

    let (_, body) = get(&app.router, "/history?limit=0").await;
    assert_eq!(body["count"], 0);

    let (_, body) = get(&app.router, "/history?limit=lots").await;
    assert_eq!(body["count"], 10);
}

#[tokio::test]
async fn test_health_reports_model_and_stream() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["stream_connected"], true);
    assert_eq!(body["stream_state"], "subscribed");

    app.stream_tx.send(StreamState::Disconnected).unwrap();
    let (_, body) = get(&app.router, "/health").await;
    assert_eq!(body["stream_connected"], false);
    assert_eq!(body["stream_state"], "disconnected");
}

#[tokio::test]
async fn test_health_degraded_without_model() {
    let app = setup_test_app(PredictionEngine::unavailable("missing required model files")).await;

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["components"]["model"]["status"], "degraded");
}

#[tokio::test]
async fn test_health_503_when_unhealthy() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    app.state
        .health_registry
        .set_unhealthy(components::MODEL, "probe failed")
        .await;

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_home_lists_endpoints() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    let (status, body) = get(&app.router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["endpoints"]["/predict"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    post_predict(&app.router, r#"{"AQI": 50}"#).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("aqi_predictions_total"));
}

#[tokio::test]
async fn test_cors_headers_present() {
    let app = setup_test_app(engine_with(Box::new(GoldenClassifier))).await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/latest")
                .header(header::ORIGIN, "http://localhost:5173")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
