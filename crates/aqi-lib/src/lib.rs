//! Core library for the AQI status prediction service
//!
//! This crate provides the core functionality for:
//! - Expanding a scalar AQI reading into the model's feature vector
//! - Loading the model artifact bundle and running inference
//! - Ingesting readings from the MQTT stream
//! - Sharing the latest prediction and a bounded history with the query API
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod state;

pub use error::{
    ConfigurationError, InferenceError, MappingError, PredictError, TransportError,
    ValidationError,
};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse};
pub use models::*;
pub use observability::{PredictionSource, ServiceMetrics, StructuredLogger};
pub use state::{SharedState, HISTORY_CAPACITY};
