//! AQI prediction server
//!
//! Loads the model bundle, subscribes to the sensor stream and serves the
//! latest prediction and history over HTTP.

use aqi_lib::{
    health::{components, follow_stream_state, HealthRegistry},
    ingest::{IngestionLoop, MqttSubscription},
    observability::{ServiceMetrics, StructuredLogger},
    predictor::{resolve_model_dir, ModelArtifacts, PredictionEngine},
    SharedState,
};
use aqi_server::api;
use aqi_server::config::{LogFormat, ServerConfig};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_NAME: &str = "aqi-server";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(config.log_format);

    info!(api_port = config.api_port, mqtt_host = %config.mqtt_host, "Starting aqi-server");

    let logger = StructuredLogger::new(SERVICE_NAME);
    let metrics = ServiceMetrics::new();
    let health_registry = HealthRegistry::new();

    // A missing or broken bundle degrades the service instead of stopping it
    let model_dir = resolve_model_dir(config.model_dir.as_deref());
    let model_dir_display = model_dir.display().to_string();
    let loaded = tokio::task::spawn_blocking(move || ModelArtifacts::load(&model_dir)).await?;
    match &loaded {
        Ok(artifacts) => {
            logger.log_artifacts_loaded(
                &model_dir_display,
                artifacts.feature_columns().len(),
                artifacts.labels().classes(),
            );
            health_registry.register(components::MODEL).await;
        }
        Err(e) => {
            logger.log_artifacts_failed(&model_dir_display, &e.to_string());
            health_registry
                .set_degraded(components::MODEL, e.to_string())
                .await;
        }
    }
    let engine = PredictionEngine::from_load_result(loaded);
    metrics.set_model_loaded(engine.is_available());
    let engine = Arc::new(engine);

    let state = SharedState::with_capacity(config.history_capacity);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (ingestion, stream_state) = IngestionLoop::new(
        MqttSubscription::new(config.mqtt_config()),
        Arc::clone(&engine),
        state.clone(),
        config.ingestion_config(),
    );
    let ingestion_handle = tokio::spawn(
        ingestion
            .with_logger(logger.clone())
            .run(shutdown_tx.subscribe()),
    );
    let health_handle = tokio::spawn(follow_stream_state(
        stream_state.clone(),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(
        Arc::clone(&engine),
        state,
        health_registry,
        stream_state,
    ));
    let mut api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    logger.log_startup(SERVICE_VERSION, config.api_port, engine.is_available());

    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            None
        }
        result = &mut api_handle => {
            // The API only returns early if it failed to bind or serve
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {:#}", e),
                Err(e) => format!("API server task panicked: {}", e),
            };
            logger.log_shutdown(&reason);
            Some(reason)
        }
    };

    let _ = shutdown_tx.send(());
    let _ = ingestion_handle.await;
    let _ = health_handle.await;

    if let Some(reason) = failure {
        anyhow::bail!(reason);
    }
    if let Ok(Err(e)) = api_handle.await {
        warn!(error = %e, "API server exited with error during shutdown");
    }
    info!("Shutdown complete");

    Ok(())
}
