//! Model artifact bundle
//!
//! The bundle is a directory of five files produced by the training
//! notebook. It is loaded and cross-checked once at startup; any problem is
//! a `ConfigurationError` and leaves the engine permanently unavailable.

use super::features::{DeploymentParams, FeatureTransform};
use super::inference::{Classifier, LabelDecoder, OnnxClassifier, Scaler, ScalerParams};
use crate::error::ConfigurationError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CLASSIFIER_FILE: &str = "best_model.onnx";
pub const SCALER_FILE: &str = "scaler.json";
pub const PARAMS_FILE: &str = "deployment_params.json";
pub const FEATURE_COLUMNS_FILE: &str = "feature_columns.json";
pub const LABEL_ENCODER_FILE: &str = "label_encoder_target.json";

pub const REQUIRED_FILES: [&str; 5] = [
    CLASSIFIER_FILE,
    SCALER_FILE,
    PARAMS_FILE,
    FEATURE_COLUMNS_FILE,
    LABEL_ENCODER_FILE,
];

/// Search order when no model directory is configured: container mount,
/// then the local development checkout
pub const DEFAULT_MODEL_DIRS: [&str; 2] = ["/app/model", "Model"];

/// Pick the model directory: configured path, else the first default that exists
pub fn resolve_model_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    DEFAULT_MODEL_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|dir| dir.is_dir())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIRS[DEFAULT_MODEL_DIRS.len() - 1]))
}

/// Classifier, scaler, label decoder and the feature transform built from the
/// deployment parameters and column order, validated against each other
pub struct ModelArtifacts {
    classifier: Box<dyn Classifier>,
    scaler: Box<dyn Scaler>,
    transform: FeatureTransform,
    labels: LabelDecoder,
}

impl ModelArtifacts {
    /// Load the bundle from a directory
    pub fn load(dir: &Path) -> Result<Self, ConfigurationError> {
        if !dir.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound(dir.to_path_buf()));
        }

        let present = list_files(dir)?;
        debug!(dir = %dir.display(), files = ?present, "Model directory contents");

        let missing: Vec<String> = REQUIRED_FILES
            .iter()
            .filter(|f| !present.iter().any(|p| p == *f))
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingFiles(missing));
        }

        let params: DeploymentParams = read_json(&dir.join(PARAMS_FILE))?;
        let feature_columns: Vec<String> = read_json(&dir.join(FEATURE_COLUMNS_FILE))?;
        let labels: LabelDecoder = read_json(&dir.join(LABEL_ENCODER_FILE))?;

        let scaler: ScalerParams = read_json(&dir.join(SCALER_FILE))?;
        scaler
            .validate()
            .map_err(|e| ConfigurationError::InvalidParams(format!("scaler: {}", e)))?;

        let classifier = OnnxClassifier::load(&dir.join(CLASSIFIER_FILE), feature_columns.len())?;

        let artifacts = Self::from_parts(
            Box::new(classifier),
            Box::new(scaler),
            params,
            feature_columns,
            labels,
        )?;

        info!(
            dir = %dir.display(),
            features = artifacts.transform.len(),
            classes = artifacts.labels.len(),
            "Model artifacts loaded"
        );
        Ok(artifacts)
    }

    /// Assemble a bundle from already-loaded members
    pub fn from_parts(
        classifier: Box<dyn Classifier>,
        scaler: Box<dyn Scaler>,
        params: DeploymentParams,
        feature_columns: Vec<String>,
        labels: LabelDecoder,
    ) -> Result<Self, ConfigurationError> {
        params.validate().map_err(ConfigurationError::InvalidParams)?;

        if labels.is_empty() {
            return Err(ConfigurationError::EmptyLabels);
        }
        // Probabilities are keyed by class name, so names must be unique
        if let Some(class) = labels.find_duplicate() {
            return Err(ConfigurationError::DuplicateLabel(class.to_string()));
        }

        let transform = FeatureTransform::new(&params, &feature_columns)?;

        if scaler.n_features() != transform.len() {
            return Err(ConfigurationError::ScalerShape {
                scaler: scaler.n_features(),
                columns: transform.len(),
            });
        }

        // The classifier must agree with the label decoder on the class count
        let probe = classifier
            .predict(&vec![0.0; transform.len()])
            .map_err(|e| ConfigurationError::Probe(e.to_string()))?;
        if probe.probabilities.len() != labels.len() {
            return Err(ConfigurationError::Probe(format!(
                "classifier produces {} probabilities but the label decoder has {} classes",
                probe.probabilities.len(),
                labels.len()
            )));
        }

        Ok(Self {
            classifier,
            scaler,
            transform,
            labels,
        })
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn scaler(&self) -> &dyn Scaler {
        self.scaler.as_ref()
    }

    pub fn transform(&self) -> &FeatureTransform {
        &self.transform
    }

    pub fn feature_columns(&self) -> &[String] {
        self.transform.feature_names()
    }

    pub fn labels(&self) -> &LabelDecoder {
        &self.labels
    }
}

fn list_files(dir: &Path) -> Result<Vec<String>, ConfigurationError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigurationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigurationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        files.push(entry.file_name().to_string_lossy().into_owned());
    }
    files.sort();
    Ok(files)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigurationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
