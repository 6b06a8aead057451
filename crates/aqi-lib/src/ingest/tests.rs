//! Ingestion loop tests
//!
//! Drive the loop through an in-memory subscription and a stub classifier
//! so no broker or ONNX model is needed.

#[cfg(test)]
mod channel_subscription_tests {
    use crate::error::{InferenceError, TransportError};
    use crate::ingest::{
        decode_payload, DropReason, IngestionConfig, IngestionLoop, MessageOutcome, StreamState,
        Subscription,
    };
    use crate::models::RawAqi;
    use crate::predictor::{
        default_feature_columns, ClassScores, Classifier, DeploymentParams, FixedClock,
        LabelDecoder, ModelArtifacts, PredictionEngine, ScalerParams,
    };
    use crate::state::SharedState;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc, watch};

    type Message = Result<Vec<u8>, TransportError>;

    /// Subscription fed from an mpsc channel
    struct ChannelSubscription {
        messages: mpsc::Receiver<Message>,
        connect_results: VecDeque<Result<(), TransportError>>,
        connects: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Subscription for ChannelSubscription {
        async fn connect(&mut self) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError> {
            match self.messages.recv().await {
                Some(message) => message,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        tx: mpsc::Sender<Message>,
        connects: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        subscription: ChannelSubscription,
    }

    fn harness(connect_results: Vec<Result<(), TransportError>>) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let connects = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let subscription = ChannelSubscription {
            messages: rx,
            connect_results: connect_results.into(),
            connects: Arc::clone(&connects),
            closed: Arc::clone(&closed),
        };
        Harness {
            tx,
            connects,
            closed,
            subscription,
        }
    }

    /// Predicts "Good" below 100 and "Unhealthy" otherwise, reading the
    /// unscaled "AQI Value" column
    struct ThresholdClassifier;

    impl Classifier for ThresholdClassifier {
        fn predict(&self, features: &[f64]) -> Result<ClassScores, InferenceError> {
            let (class_index, probabilities) = if features[0] < 100.0 {
                (0, vec![0.9, 0.1])
            } else {
                (1, vec![0.2, 0.8])
            };
            Ok(ClassScores {
                class_index,
                probabilities,
            })
        }
    }

    fn engine() -> Arc<PredictionEngine> {
        let columns = default_feature_columns();
        let n = columns.len();
        let params = DeploymentParams {
            aqi_bin_10_edges: Some((0..=10).map(|i| i as f64 * 50.0).collect()),
            aqi_bin_20_edges: Some((0..=20).map(|i| i as f64 * 25.0).collect()),
            outlier_lower_bound: None,
            outlier_upper_bound: None,
        };
        let artifacts = ModelArtifacts::from_parts(
            Box::new(ThresholdClassifier),
            Box::new(ScalerParams::Standard {
                mean: vec![0.0; n],
                scale: vec![1.0; n],
            }),
            params,
            columns,
            LabelDecoder::new(vec!["Good".to_string(), "Unhealthy".to_string()]),
        )
        .unwrap();
        let clock = FixedClock(DateTime::parse_from_rfc3339("2024-03-15T10:30:00+00:00").unwrap());
        Arc::new(PredictionEngine::with_clock(artifacts, Arc::new(clock)))
    }

    fn fast_config() -> IngestionConfig {
        IngestionConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    async fn wait_for_state(states: &mut watch::Receiver<StreamState>, wanted: StreamState) {
        let reached = tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|state| *state == wanted),
        )
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
        assert!(reached, "never reached {:?}", wanted);
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload(br#"{"AQI": 42}"#).unwrap(), RawAqi::Number(42.0));
        assert_eq!(
            decode_payload(br#"{"AQI": "42", "device": "esp32"}"#).unwrap(),
            RawAqi::Text("42".to_string())
        );
        assert!(matches!(
            decode_payload(br#"{"PM25": 12}"#),
            Err(DropReason::MissingField)
        ));
        assert!(matches!(
            decode_payload(br#"{"AQI": null}"#),
            Err(DropReason::MissingField)
        ));
        assert!(matches!(
            decode_payload(b"[1, 2, 3]"),
            Err(DropReason::MissingField)
        ));
        assert!(matches!(
            decode_payload(b"AQI=42"),
            Err(DropReason::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_payload_publishes_and_drops() {
        let h = harness(vec![]);
        let state = SharedState::new();
        let (ingestion, _states) =
            IngestionLoop::new(h.subscription, engine(), state.clone(), fast_config());

        let outcome = ingestion.handle_payload(br#"{"AQI": 42}"#);
        match outcome {
            MessageOutcome::Published(result) => {
                assert_eq!(result.aqi_value, 42.0);
                assert_eq!(result.predicted_status, "Good");
            }
            other => panic!("expected publish, got {:?}", other),
        }

        let bad_payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"temperature": 30}"#,
            br#"{"AQI": "high"}"#,
            br#"{"AQI": -3}"#,
        ];
        for bad in bad_payloads {
            assert!(!ingestion.handle_payload(bad).is_published());
        }

        assert_eq!(state.len(), 1);
        assert_eq!(state.latest().unwrap().aqi_value, 42.0);
    }

    #[tokio::test]
    async fn test_unavailable_engine_drops_messages() {
        let h = harness(vec![]);
        let state = SharedState::new();
        let engine = Arc::new(PredictionEngine::unavailable("missing model"));
        let (ingestion, _states) =
            IngestionLoop::new(h.subscription, engine, state.clone(), fast_config());

        match ingestion.handle_payload(br#"{"AQI": 42}"#) {
            MessageOutcome::Dropped(DropReason::Prediction(e)) => {
                assert_eq!(e.kind(), "model_unavailable")
            }
            other => panic!("expected drop, got {:?}", other),
        }
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_loop_survives_malformed_payloads() {
        let h = harness(vec![]);
        let state = SharedState::new();
        let (ingestion, mut states) =
            IngestionLoop::new(h.subscription, engine(), state.clone(), fast_config());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ingestion.run(shutdown_rx));

        wait_for_state(&mut states, StreamState::Subscribed).await;

        h.tx.send(Ok(br#"{"AQI": 20}"#.to_vec())).await.unwrap();
        h.tx.send(Ok(b"{{{{".to_vec())).await.unwrap();
        h.tx.send(Ok(br#"{"aqi": 30}"#.to_vec())).await.unwrap();
        h.tx.send(Ok(br#"{"AQI": 150}"#.to_vec())).await.unwrap();

        assert!(wait_for(|| state.len() == 2).await);
        let history = state.history(10);
        assert_eq!(history[0].aqi_value, 20.0);
        assert_eq!(history[1].aqi_value, 150.0);
        assert_eq!(history[1].predicted_status, "Unhealthy");
        assert_eq!(*states.borrow(), StreamState::Receiving);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
        assert_eq!(*states.borrow(), StreamState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnects_after_connect_failures() {
        let h = harness(vec![
            Err(TransportError::Connect("connection refused".to_string())),
            Err(TransportError::Refused("NotAuthorized".to_string())),
        ]);
        let state = SharedState::new();
        let (ingestion, mut states) =
            IngestionLoop::new(h.subscription, engine(), state.clone(), fast_config());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ingestion.run(shutdown_rx));

        wait_for_state(&mut states, StreamState::Subscribed).await;
        assert_eq!(h.connects.load(Ordering::SeqCst), 3);

        h.tx.send(Ok(br#"{"AQI": 55}"#.to_vec())).await.unwrap();
        assert!(wait_for(|| state.len() == 1).await);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_stream_error() {
        let h = harness(vec![]);
        let state = SharedState::new();
        let (ingestion, mut states) =
            IngestionLoop::new(h.subscription, engine(), state.clone(), fast_config());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ingestion.run(shutdown_rx));

        wait_for_state(&mut states, StreamState::Subscribed).await;
        h.tx.send(Err(TransportError::Disconnected("keep-alive timeout".to_string())))
            .await
            .unwrap();

        let connects = Arc::clone(&h.connects);
        assert!(wait_for(|| connects.load(Ordering::SeqCst) == 2).await);

        h.tx.send(Ok(br#"{"AQI": 77}"#.to_vec())).await.unwrap();
        assert!(wait_for(|| state.len() == 1).await);
        assert_eq!(state.latest().unwrap().aqi_value, 77.0);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let h = harness(vec![Err(TransportError::Connect("down".to_string()))]);
        let config = IngestionConfig {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
        };
        let (ingestion, mut states) =
            IngestionLoop::new(h.subscription, engine(), SharedState::new(), config);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(ingestion.run(shutdown_rx));

        let connects = Arc::clone(&h.connects);
        assert!(wait_for(|| connects.load(Ordering::SeqCst) == 1).await);
        wait_for_state(&mut states, StreamState::Disconnected).await;

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let h = harness(vec![
            Err(TransportError::Connect("a".to_string())),
            Err(TransportError::Connect("b".to_string())),
            Err(TransportError::Connect("c".to_string())),
            Err(TransportError::Connect("d".to_string())),
        ]);
        let config = IngestionConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
        };
        let (ingestion, mut states) =
            IngestionLoop::new(h.subscription, engine(), SharedState::new(), config);
        assert_eq!(ingestion.current_backoff(), Duration::from_secs(1));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let start = tokio::time::Instant::now();
        let task = tokio::spawn(ingestion.run(shutdown_rx));

        // Delays: 1s + 2s + 3s (capped) + 3s
        states
            .wait_for(|state| *state == StreamState::Subscribed)
            .await
            .unwrap();
        assert_eq!(h.connects.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() >= Duration::from_secs(9));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
