//! Prediction engine
//!
//! Composes the feature transform with the loaded artifacts:
//! coerce -> transform -> scale -> classify -> decode -> assemble.
//! The engine is CPU-only and never awaits, so it is shared by the
//! ingestion task and the query handlers behind a plain `Arc`.

use super::artifacts::ModelArtifacts;
use super::calendar::{Clock, SystemClock};
use crate::error::{ConfigurationError, InferenceError, PredictError};
use crate::models::{PredictionResult, RawAqi};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Allowed deviation of the probability sum from 1
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

enum ModelSlot {
    Loaded(Arc<ModelArtifacts>),
    Unavailable(String),
}

pub struct PredictionEngine {
    model: ModelSlot,
    clock: Arc<dyn Clock>,
}

impl PredictionEngine {
    pub fn new(artifacts: ModelArtifacts) -> Self {
        Self::with_clock(artifacts, Arc::new(SystemClock))
    }

    pub fn with_clock(artifacts: ModelArtifacts, clock: Arc<dyn Clock>) -> Self {
        Self {
            model: ModelSlot::Loaded(Arc::new(artifacts)),
            clock,
        }
    }

    /// Engine that rejects every request; used when the bundle failed to load
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            model: ModelSlot::Unavailable(reason.into()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_load_result(result: Result<ModelArtifacts, ConfigurationError>) -> Self {
        match result {
            Ok(artifacts) => Self::new(artifacts),
            Err(e) => Self::unavailable(e.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.model, ModelSlot::Loaded(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.model {
            ModelSlot::Loaded(_) => None,
            ModelSlot::Unavailable(reason) => Some(reason),
        }
    }

    pub fn artifacts(&self) -> Option<&ModelArtifacts> {
        match &self.model {
            ModelSlot::Loaded(artifacts) => Some(artifacts),
            ModelSlot::Unavailable(_) => None,
        }
    }

    /// Predict the status for one raw AQI value
    pub fn predict(&self, raw: &RawAqi) -> Result<PredictionResult, PredictError> {
        let artifacts = match &self.model {
            ModelSlot::Loaded(artifacts) => artifacts,
            ModelSlot::Unavailable(reason) => {
                return Err(PredictError::ModelUnavailable {
                    raw: raw.to_string(),
                    reason: reason.clone(),
                })
            }
        };

        let validation = |source| PredictError::Validation {
            raw: raw.to_string(),
            source,
        };
        let inference = |source| PredictError::Inference {
            raw: raw.to_string(),
            source,
        };

        let aqi = raw.coerce().map_err(validation)?;
        let now = self.clock.now();

        let features = artifacts
            .transform()
            .transform(aqi, now.date_naive())
            .map_err(validation)?;
        let scaled = artifacts
            .scaler()
            .transform(features.values())
            .map_err(inference)?;
        let scores = artifacts.classifier().predict(&scaled).map_err(inference)?;

        let labels = artifacts.labels();
        let probabilities = normalize(&scores.probabilities, labels.len()).map_err(inference)?;
        let predicted_status = labels.decode(scores.class_index).map_err(inference)?;

        debug!(
            aqi = aqi,
            status = %predicted_status,
            class_index = scores.class_index,
            "Prediction computed"
        );

        let class_probabilities: BTreeMap<String, f64> = labels
            .classes()
            .iter()
            .cloned()
            .zip(probabilities)
            .collect();

        Ok(PredictionResult {
            aqi_value: aqi,
            predicted_status: predicted_status.to_string(),
            class_probabilities,
            timestamp: now,
        })
    }
}

/// Validate the distribution and rescale it to sum to 1
fn normalize(probabilities: &[f64], classes: usize) -> Result<Vec<f64>, InferenceError> {
    if probabilities.len() != classes {
        return Err(InferenceError::ProbabilityShape {
            expected: classes,
            actual: probabilities.len(),
        });
    }
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(InferenceError::Degenerate);
    }

    let sum: f64 = probabilities.iter().sum();
    if sum <= 0.0 {
        return Err(InferenceError::Degenerate);
    }
    if (sum - 1.0).abs() <= PROBABILITY_TOLERANCE {
        return Ok(probabilities.to_vec());
    }
    Ok(probabilities.iter().map(|p| p / sum).collect())
}
