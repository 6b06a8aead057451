//! HTTP query API
//!
//! `/` banner, `/health`, `/predict`, `/latest`, `/history` and `/metrics`,
//! with permissive CORS for the browser dashboard.

use aqi_lib::{
    health::{ComponentHealth, ComponentStatus, HealthRegistry},
    ingest::{decode_payload, StreamState},
    observability::{PredictionSource, ServiceMetrics},
    predictor::PredictionEngine,
    PredictionResult, SharedState,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// History length returned when `limit` is absent or unparseable
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const MISSING_AQI_MESSAGE: &str = "Missing 'AQI' field in request";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PredictionEngine>,
    pub state: SharedState,
    pub health_registry: HealthRegistry,
    pub stream_state: watch::Receiver<StreamState>,
    pub metrics: ServiceMetrics,
}

impl AppState {
    pub fn new(
        engine: Arc<PredictionEngine>,
        state: SharedState,
        health_registry: HealthRegistry,
        stream_state: watch::Receiver<StreamState>,
    ) -> Self {
        Self {
            engine,
            state,
            health_registry,
            stream_state,
            metrics: ServiceMetrics::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: ComponentStatus,
    model_loaded: bool,
    stream_connected: bool,
    stream_state: StreamState,
    components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Serialize)]
struct HistoryBody {
    count: usize,
    history: Vec<Arc<PredictionResult>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

async fn home() -> impl IntoResponse {
    Json(json!({
        "message": "AQI Prediction API",
        "status": "running",
        "endpoints": {
            "/": "This endpoint",
            "/predict": "POST - Predict status from AQI value",
            "/latest": "GET - Get latest prediction from the sensor stream",
            "/history": "GET - Get prediction history (?limit=N)",
            "/health": "GET - Health check",
            "/metrics": "GET - Prometheus metrics"
        }
    }))
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let stream_state = *state.stream_state.borrow();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving history
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = HealthBody {
        status: health.status,
        model_loaded: state.engine.is_available(),
        stream_connected: stream_state.is_connected(),
        stream_state,
        components: health.components,
    };
    (status_code, Json(body))
}

/// On-demand prediction; the result is not added to the history.
///
/// A missing or unparseable `AQI` is a 400. Every engine failure is a 500,
/// with `kind` telling validation, model and inference failures apart.
async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let raw = match decode_payload(&body) {
        Ok(raw) => raw,
        Err(_) => {
            let body = ErrorBody {
                error: MISSING_AQI_MESSAGE.to_string(),
                kind: None,
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let start = Instant::now();
    let prediction = state.engine.predict(&raw);
    state
        .metrics
        .observe_prediction_latency(start.elapsed().as_secs_f64());

    match prediction {
        Ok(result) => {
            state.metrics.inc_predictions(PredictionSource::Request);
            info!(
                aqi = result.aqi_value,
                status = %result.predicted_status,
                "On-demand prediction"
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            state.metrics.inc_prediction_errors(e.kind());
            warn!(error = %e, kind = e.kind(), raw = %e.raw_input(), "Prediction request failed");
            let body = ErrorBody {
                error: e.to_string(),
                kind: Some(e.kind()),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn latest(State(state): State<Arc<AppState>>) -> Response {
    match state.state.latest() {
        Some(result) => (StatusCode::OK, Json(result)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "No predictions received yet" })),
        )
            .into_response(),
    }
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = params
        .get("limit")
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    let history = state.state.history(limit);
    Json(HistoryBody {
        count: history.len(),
        history,
    })
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/latest", get(latest))
        .route("/history", get(history))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server; returns once the shutdown signal fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
