//! Core data models for the AQI service

use crate::error::ValidationError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// AQI value as it arrives from a request body or stream payload
///
/// Devices and clients send either a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAqi {
    Number(f64),
    Text(String),
}

impl RawAqi {
    /// Wrap an arbitrary JSON value; non-number, non-string values are kept
    /// as text so that coercion reports them as non-numeric.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) => RawAqi::Number(v),
                None => RawAqi::Text(n.to_string()),
            },
            serde_json::Value::String(s) => RawAqi::Text(s.clone()),
            other => RawAqi::Text(other.to_string()),
        }
    }

    /// Coerce to a finite real number
    pub fn coerce(&self) -> Result<f64, ValidationError> {
        let value = match self {
            RawAqi::Number(v) => *v,
            RawAqi::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ValidationError::NotNumeric { raw: s.clone() })?,
        };

        if !value.is_finite() {
            return Err(ValidationError::NotFinite {
                raw: self.to_string(),
            });
        }
        Ok(value)
    }
}

impl fmt::Display for RawAqi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawAqi::Number(v) => write!(f, "{}", v),
            RawAqi::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<f64> for RawAqi {
    fn from(value: f64) -> Self {
        RawAqi::Number(value)
    }
}

impl From<&str> for RawAqi {
    fn from(value: &str) -> Self {
        RawAqi::Text(value.to_string())
    }
}

/// Outcome of one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "aqi")]
    pub aqi_value: f64,
    pub predicted_status: String,
    /// Label -> probability, one entry per class known to the label decoder
    #[serde(rename = "probabilities")]
    pub class_probabilities: BTreeMap<String, f64>,
    pub timestamp: DateTime<FixedOffset>,
}

impl PredictionResult {
    pub fn probability_sum(&self) -> f64 {
        self.class_probabilities.values().sum()
    }

    /// Probability assigned to the predicted label
    pub fn confidence(&self) -> f64 {
        self.class_probabilities
            .get(&self.predicted_status)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Ordered, named feature values fed to the scaler and classifier
///
/// Names are shared with the feature layout so building a vector per
/// prediction only allocates the values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Arc<[String]>, values: Vec<f64>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}
