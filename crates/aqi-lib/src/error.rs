//! Error taxonomy for the prediction pipeline
//!
//! Startup-class errors (`ConfigurationError`, `MappingError`) disable
//! prediction for the lifetime of the process. Per-request errors
//! (`ValidationError`, `InferenceError`) are returned to the caller and never
//! take the process down. `TransportError` stays inside the ingestion loop.

use std::path::PathBuf;
use thiserror::Error;

/// Input that cannot be turned into a usable AQI value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("AQI value {raw:?} is not a number")]
    NotNumeric { raw: String },

    #[error("AQI value {raw:?} is not finite")]
    NotFinite { raw: String },

    #[error("AQI value {value} is negative; sqrt and log features are undefined")]
    Negative { value: f64 },
}

/// A feature column the transform cannot produce
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("feature column {0:?} is not produced by the transform")]
    UnknownColumn(String),

    #[error("feature column {column:?} requires deployment parameter {param:?}")]
    MissingParameter { column: String, param: &'static str },

    #[error("feature column list is empty")]
    EmptyColumns,
}

/// Model artifact bundle missing, unreadable or inconsistent
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("model directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("missing required model files: {0:?}")]
    MissingFiles(Vec<String>),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to load classifier from {path}: {message}")]
    Classifier { path: PathBuf, message: String },

    #[error("invalid deployment parameters: {0}")]
    InvalidParams(String),

    #[error("scaler expects {scaler} features but {columns} feature columns are configured")]
    ScalerShape { scaler: usize, columns: usize },

    #[error("label decoder has no classes")]
    EmptyLabels,

    #[error("label decoder lists class {0:?} more than once")]
    DuplicateLabel(String),

    #[error("classifier probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Failure inside the scaler or classifier
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("expected {expected} features, got {actual}")]
    Shape { expected: usize, actual: usize },

    #[error("model execution failed: {0}")]
    Model(String),

    #[error("class index {index} is outside the {classes} known labels")]
    UnknownClass { index: usize, classes: usize },

    #[error("classifier returned {actual} probabilities for {expected} classes")]
    ProbabilityShape { expected: usize, actual: usize },

    #[error("classifier returned an unusable probability distribution")]
    Degenerate,
}

/// Subscription-level failure; retried by the ingestion loop
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("timed out waiting for {0} from broker")]
    Timeout(&'static str),

    #[error("stream disconnected: {0}")]
    Disconnected(String),

    #[error("stream closed")]
    Closed,
}

/// Errors returned by `PredictionEngine::predict`
///
/// Every variant carries the raw input so callers can log it.
#[derive(Debug, Clone, Error)]
pub enum PredictError {
    #[error("invalid AQI input {raw}: {source}")]
    Validation {
        raw: String,
        #[source]
        source: ValidationError,
    },

    #[error("model not loaded ({reason}); cannot predict for AQI {raw}")]
    ModelUnavailable { raw: String, reason: String },

    #[error("inference failed for AQI {raw}: {source}")]
    Inference {
        raw: String,
        #[source]
        source: InferenceError,
    },
}

impl PredictError {
    /// Short machine-readable kind, used in API responses and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Validation { .. } => "validation",
            PredictError::ModelUnavailable { .. } => "model_unavailable",
            PredictError::Inference { .. } => "inference",
        }
    }

    /// The offending input as received
    pub fn raw_input(&self) -> &str {
        match self {
            PredictError::Validation { raw, .. }
            | PredictError::ModelUnavailable { raw, .. }
            | PredictError::Inference { raw, .. } => raw,
        }
    }
}
