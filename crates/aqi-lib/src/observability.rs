//! Observability infrastructure for the AQI service
//!
//! Provides:
//! - Prometheus metrics (prediction latency, throughput by source, errors,
//!   stream health, history size)
//! - Structured logging of domain events with tracing

use crate::ingest::StreamState;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions_total: IntCounterVec,
    prediction_errors_total: IntCounterVec,
    messages_received_total: IntCounter,
    messages_dropped_total: IntCounterVec,
    history_size: IntGauge,
    stream_connected: IntGauge,
    model_loaded: IntGauge,
    reconnect_attempts_total: IntCounter,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "aqi_prediction_latency_seconds",
                "Time spent transforming, scaling and classifying one reading",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_total: register_int_counter_vec!(
                "aqi_predictions_total",
                "Successful predictions by source",
                &["source"]
            )
            .expect("Failed to register predictions_total"),

            prediction_errors_total: register_int_counter_vec!(
                "aqi_prediction_errors_total",
                "Failed predictions by error kind",
                &["kind"]
            )
            .expect("Failed to register prediction_errors_total"),

            messages_received_total: register_int_counter!(
                "aqi_stream_messages_received_total",
                "Messages received from the reading stream"
            )
            .expect("Failed to register messages_received_total"),

            messages_dropped_total: register_int_counter_vec!(
                "aqi_stream_messages_dropped_total",
                "Stream messages dropped without publishing, by reason",
                &["reason"]
            )
            .expect("Failed to register messages_dropped_total"),

            history_size: register_int_gauge!(
                "aqi_history_size",
                "Number of predictions held in the history"
            )
            .expect("Failed to register history_size"),

            stream_connected: register_int_gauge!(
                "aqi_stream_connected",
                "1 while subscribed to the reading stream"
            )
            .expect("Failed to register stream_connected"),

            model_loaded: register_int_gauge!(
                "aqi_model_loaded",
                "1 if the model artifact bundle loaded successfully"
            )
            .expect("Failed to register model_loaded"),

            reconnect_attempts_total: register_int_counter!(
                "aqi_stream_reconnect_attempts_total",
                "Connection attempts made after the first"
            )
            .expect("Failed to register reconnect_attempts_total"),
        }
    }
}

/// Where a prediction request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    Stream,
    Request,
}

impl PredictionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionSource::Stream => "stream",
            PredictionSource::Request => "request",
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_predictions(&self, source: PredictionSource) {
        self.inner()
            .predictions_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn inc_prediction_errors(&self, kind: &str) {
        self.inner()
            .prediction_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_messages_received(&self) {
        self.inner().messages_received_total.inc();
    }

    pub fn inc_messages_dropped(&self, reason: &str) {
        self.inner()
            .messages_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_history_size(&self, size: usize) {
        self.inner().history_size.set(size as i64);
    }

    pub fn set_stream_connected(&self, connected: bool) {
        self.inner().stream_connected.set(i64::from(connected));
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.inner().model_loaded.set(i64::from(loaded));
    }

    pub fn inc_reconnect_attempts(&self) {
        self.inner().reconnect_attempts_total.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for service events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, api_port: u16, model_loaded: bool) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            api_port = api_port,
            model_loaded = model_loaded,
            "AQI prediction service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "AQI prediction service shutting down"
        );
    }

    pub fn log_artifacts_loaded(&self, dir: &str, features: usize, classes: &[String]) {
        info!(
            event = "artifacts_loaded",
            service = %self.service,
            model_dir = %dir,
            features = features,
            classes = ?classes,
            "Model artifacts loaded"
        );
    }

    pub fn log_artifacts_failed(&self, dir: &str, reason: &str) {
        error!(
            event = "artifacts_failed",
            service = %self.service,
            model_dir = %dir,
            reason = %reason,
            "Model artifacts unavailable; predictions disabled"
        );
    }

    pub fn log_prediction_published(&self, aqi: f64, status: &str, confidence: f64, history_len: usize) {
        info!(
            event = "prediction_published",
            service = %self.service,
            aqi = aqi,
            predicted_status = %status,
            confidence = confidence,
            history_len = history_len,
            "Published stream prediction"
        );
    }

    pub fn log_message_dropped(&self, reason: &str, detail: &str) {
        warn!(
            event = "message_dropped",
            service = %self.service,
            reason = %reason,
            detail = %detail,
            "Dropped stream message"
        );
    }

    pub fn log_stream_state(&self, state: StreamState, detail: Option<&str>) {
        match state {
            StreamState::Disconnected => warn!(
                event = "stream_state",
                service = %self.service,
                state = %state,
                detail = ?detail,
                "Stream disconnected"
            ),
            StreamState::Receiving => debug!(
                event = "stream_state",
                service = %self.service,
                state = %state,
                "Stream receiving"
            ),
            _ => info!(
                event = "stream_state",
                service = %self.service,
                state = %state,
                detail = ?detail,
                "Stream state changed"
            ),
        }
    }
}
