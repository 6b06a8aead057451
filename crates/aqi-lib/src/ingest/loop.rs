//! Ingestion loop
//!
//! `Disconnected -> Connecting -> Subscribed -> Receiving* -> Disconnected`,
//! reconnecting with exponential backoff until shutdown.

use super::{decode_payload, StreamState, Subscription};
use crate::error::{PredictError, TransportError};
use crate::models::PredictionResult;
use crate::observability::{PredictionSource, ServiceMetrics, StructuredLogger};
use crate::predictor::PredictionEngine;
use crate::state::SharedState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Reconnect settings for the ingestion loop
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Delay before the first reconnect attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff
    pub max_backoff: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Why a message was not published
#[derive(Debug, Clone)]
pub enum DropReason {
    /// Payload is not valid JSON
    Malformed(String),
    /// Payload has no `AQI` field
    MissingField,
    /// The engine rejected the reading
    Prediction(PredictError),
}

impl DropReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed(_) => "malformed",
            DropReason::MissingField => "missing_field",
            DropReason::Prediction(_) => "prediction_failed",
        }
    }

    fn detail(&self) -> String {
        match self {
            DropReason::Malformed(e) => e.clone(),
            DropReason::MissingField => "payload has no AQI field".to_string(),
            DropReason::Prediction(e) => e.to_string(),
        }
    }
}

/// Result of handling one payload
#[derive(Debug, Clone)]
pub enum MessageOutcome {
    Published(Arc<PredictionResult>),
    Dropped(DropReason),
}

impl MessageOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, MessageOutcome::Published(_))
    }
}

/// Background task feeding stream readings through the engine
pub struct IngestionLoop<S: Subscription> {
    subscription: S,
    engine: Arc<PredictionEngine>,
    state: SharedState,
    config: IngestionConfig,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
    state_tx: watch::Sender<StreamState>,
    current_backoff: Duration,
}

impl<S: Subscription> IngestionLoop<S> {
    /// Create the loop and a receiver for its connection state
    pub fn new(
        subscription: S,
        engine: Arc<PredictionEngine>,
        state: SharedState,
        config: IngestionConfig,
    ) -> (Self, watch::Receiver<StreamState>) {
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);
        let current_backoff = config.initial_backoff;

        let ingestion = Self {
            subscription,
            engine,
            state,
            config,
            metrics: ServiceMetrics::new(),
            logger: StructuredLogger::new("aqi-server"),
            state_tx,
            current_backoff,
        };
        (ingestion, state_rx)
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run until the shutdown signal fires, then close the subscription
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            initial_backoff_ms = self.config.initial_backoff.as_millis() as u64,
            max_backoff_secs = self.config.max_backoff.as_secs(),
            "Starting ingestion loop"
        );

        let mut attempts = 0u64;

        'session: loop {
            self.set_state(StreamState::Connecting, None);
            if attempts > 0 {
                self.metrics.inc_reconnect_attempts();
            }
            attempts += 1;

            let connected = tokio::select! {
                result = self.subscription.connect() => result,
                _ = shutdown.recv() => break 'session,
            };

            if let Err(e) = connected {
                if !self.backoff_after(e, &mut shutdown).await {
                    break 'session;
                }
                continue 'session;
            }

            self.current_backoff = self.config.initial_backoff;
            self.set_state(StreamState::Subscribed, None);

            loop {
                tokio::select! {
                    payload = self.subscription.next_payload() => match payload {
                        Ok(payload) => {
                            self.set_state(StreamState::Receiving, None);
                            self.handle_payload(&payload);
                        }
                        Err(e) => {
                            if !self.backoff_after(e, &mut shutdown).await {
                                break 'session;
                            }
                            continue 'session;
                        }
                    },
                    _ = shutdown.recv() => break 'session,
                }
            }
        }

        info!("Shutting down ingestion loop");
        self.subscription.close().await;
        self.set_state(StreamState::Disconnected, Some("shutdown"));
    }

    /// Decode, predict and publish one payload; never fails
    pub fn handle_payload(&self, payload: &[u8]) -> MessageOutcome {
        self.metrics.inc_messages_received();

        let outcome = match decode_payload(payload) {
            Ok(raw) => {
                let start = Instant::now();
                let prediction = self.engine.predict(&raw);
                self.metrics
                    .observe_prediction_latency(start.elapsed().as_secs_f64());

                match prediction {
                    Ok(result) => {
                        let published = self.state.publish(result);
                        let history_len = self.state.len();
                        self.metrics.inc_predictions(PredictionSource::Stream);
                        self.metrics.set_history_size(history_len);
                        self.logger.log_prediction_published(
                            published.aqi_value,
                            &published.predicted_status,
                            published.confidence(),
                            history_len,
                        );
                        MessageOutcome::Published(published)
                    }
                    Err(e) => {
                        self.metrics.inc_prediction_errors(e.kind());
                        MessageOutcome::Dropped(DropReason::Prediction(e))
                    }
                }
            }
            Err(reason) => MessageOutcome::Dropped(reason),
        };

        if let MessageOutcome::Dropped(reason) = &outcome {
            self.metrics.inc_messages_dropped(reason.as_str());
            self.logger.log_message_dropped(reason.as_str(), &reason.detail());
            debug!(payload = %String::from_utf8_lossy(payload), "Dropped payload");
        }
        outcome
    }

    /// Record the failure and sleep for the current backoff.
    /// Returns false if shutdown fired while waiting.
    async fn backoff_after(
        &mut self,
        error: TransportError,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let delay = self.current_backoff;
        self.current_backoff = std::cmp::min(delay * 2, self.config.max_backoff);

        let detail = error.to_string();
        self.set_state(StreamState::Disconnected, Some(&detail));
        warn!(
            error = %detail,
            retry_in_ms = delay.as_millis() as u64,
            "Stream connection lost, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.recv() => false,
        }
    }

    fn set_state(&self, state: StreamState, detail: Option<&str>) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            self.metrics.set_stream_connected(state.is_connected());
            self.logger.log_stream_state(state, detail);
        }
    }

    /// Backoff that will be used for the next reconnect
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}
