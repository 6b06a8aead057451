//! Classifier, scaler and label decoding
//!
//! Wraps the exported classifier, the fitted feature scaler and the label
//! decoder behind small traits so the engine can be exercised with stubs.

use crate::error::{ConfigurationError, InferenceError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Inference slower than this is logged at warn
const MAX_INFERENCE_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Class decision plus the full distribution, in class-index order
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    pub class_index: usize,
    pub probabilities: Vec<f64>,
}

/// Trained classifier over scaled feature vectors
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<ClassScores, InferenceError>;
}

/// Fitted feature scaler
pub trait Scaler: Send + Sync {
    /// Number of features the scaler was fitted on
    fn n_features(&self) -> usize;

    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError>;
}

/// Scaler parameters as exported from the training pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerParams {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl ScalerParams {
    pub fn validate(&self) -> Result<(), String> {
        let (offsets, scale) = match self {
            ScalerParams::Standard { mean, scale } => (mean, scale),
            ScalerParams::MinMax { min, scale } => (min, scale),
        };
        if offsets.len() != scale.len() {
            return Err(format!(
                "scaler offset has {} entries but scale has {}",
                offsets.len(),
                scale.len()
            ));
        }
        if offsets.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err("scaler contains non-finite values".to_string());
        }
        if matches!(self, ScalerParams::Standard { .. }) && scale.iter().any(|s| *s == 0.0) {
            return Err("standard scaler has a zero scale".to_string());
        }
        Ok(())
    }
}

impl Scaler for ScalerParams {
    fn n_features(&self) -> usize {
        match self {
            ScalerParams::Standard { scale, .. } | ScalerParams::MinMax { scale, .. } => {
                scale.len()
            }
        }
    }

    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if features.len() != self.n_features() {
            return Err(InferenceError::Shape {
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        let scaled = match self {
            ScalerParams::Standard { mean, scale } => features
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| (x - m) / s)
                .collect(),
            ScalerParams::MinMax { min, scale } => features
                .iter()
                .zip(min.iter().zip(scale))
                .map(|(x, (m, s))| x * s + m)
                .collect(),
        };
        Ok(scaled)
    }
}

/// Maps class indices back to status labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecoder {
    classes: Vec<String>,
}

impl LabelDecoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// First class name that appears more than once
    pub fn find_duplicate(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.classes
            .iter()
            .find(|class| !seen.insert(class.as_str()))
            .map(String::as_str)
    }

    pub fn decode(&self, index: usize) -> Result<&str, InferenceError> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or(InferenceError::UnknownClass {
                index,
                classes: self.classes.len(),
            })
    }
}

/// ONNX classifier executed with tract
///
/// Expects an sklearn-onnx export with `zipmap=False`: output 0 is the
/// int64 label, output 1 the `[1, n_classes]` probability tensor. A
/// single-output graph is treated as probabilities only.
pub struct OnnxClassifier {
    model: TractModel,
    n_features: usize,
}

impl OnnxClassifier {
    /// Load and optimize an ONNX model from a file
    pub fn load(path: &Path, n_features: usize) -> Result<Self, ConfigurationError> {
        let classifier_error = |e: anyhow::Error| ConfigurationError::Classifier {
            path: path.to_path_buf(),
            message: format!("{:#}", e),
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| classifier_error(e.context("Failed to parse ONNX model")))?
            .with_input_fact(0, f32::fact([1, n_features]).into())
            .map_err(|e| classifier_error(e.context("Failed to set input shape")))?
            .into_optimized()
            .map_err(|e| classifier_error(e.context("Failed to optimize model")))?
            .into_runnable()
            .map_err(|e| classifier_error(e.context("Failed to create runnable model")))?;

        Ok(Self { model, n_features })
    }

    fn features_to_tensor(&self, features: &[f64]) -> Result<Tensor, InferenceError> {
        let data: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        let array = tract_ndarray::Array2::from_shape_vec((1, self.n_features), data)
            .map_err(|e| InferenceError::Model(e.to_string()))?;
        Ok(array.into())
    }

    fn read_outputs(outputs: &[TValue]) -> Result<ClassScores, InferenceError> {
        let model_error = |e: anyhow::Error| InferenceError::Model(e.to_string());

        let (label, probs) = match outputs {
            [probs] => (None, probs),
            [label, probs, ..] => (Some(label), probs),
            [] => return Err(InferenceError::Model("No output from model".to_string())),
        };

        let probabilities: Vec<f64> = probs
            .to_array_view::<f32>()
            .map_err(model_error)?
            .iter()
            .map(|p| *p as f64)
            .collect();

        let class_index = match label {
            Some(label) => {
                let view = label.to_array_view::<i64>().map_err(model_error)?;
                let index = view
                    .iter()
                    .next()
                    .copied()
                    .ok_or_else(|| InferenceError::Model("Empty label output".to_string()))?;
                usize::try_from(index)
                    .map_err(|_| InferenceError::Model(format!("negative class label {}", index)))?
            }
            None => argmax(&probabilities).ok_or(InferenceError::Degenerate)?,
        };

        Ok(ClassScores {
            class_index,
            probabilities,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &[f64]) -> Result<ClassScores, InferenceError> {
        if features.len() != self.n_features {
            return Err(InferenceError::Shape {
                expected: self.n_features,
                actual: features.len(),
            });
        }

        let start = Instant::now();
        let input = self.features_to_tensor(features)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        Self::read_outputs(&outputs)
    }
}

/// Index of the largest finite value
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
}
