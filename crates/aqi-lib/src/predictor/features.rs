//! Feature extraction for ML inference
//!
//! Expands a single AQI reading into the feature vector the classifier was
//! trained on: raw value transforms, bin indices, distances to the AQI
//! breakpoints, band indicators, the encoded category, an outlier flag and
//! calendar context. The column order comes from the artifact bundle and is
//! resolved once, so an unknown column fails at load time rather than on the
//! first reading.

use super::calendar::CalendarFeatures;
use crate::error::{MappingError, ValidationError};
use crate::models::FeatureVector;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// AQI breakpoints used for the distance features
pub const REFERENCE_POINTS: [u16; 5] = [50, 100, 150, 200, 300];

/// Saved training-time constants needed at inference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentParams {
    #[serde(default)]
    pub aqi_bin_10_edges: Option<Vec<f64>>,
    #[serde(default)]
    pub aqi_bin_20_edges: Option<Vec<f64>>,
    #[serde(default)]
    pub outlier_lower_bound: Option<f64>,
    #[serde(default)]
    pub outlier_upper_bound: Option<f64>,
}

impl DeploymentParams {
    /// Check edge arrays and outlier bounds for consistency
    pub fn validate(&self) -> Result<(), String> {
        for (name, edges) in [
            ("aqi_bin_10_edges", &self.aqi_bin_10_edges),
            ("aqi_bin_20_edges", &self.aqi_bin_20_edges),
        ] {
            if let Some(edges) = edges {
                if edges.len() < 2 {
                    return Err(format!("{} needs at least 2 edges, got {}", name, edges.len()));
                }
                if edges.iter().any(|e| !e.is_finite()) {
                    return Err(format!("{} contains a non-finite edge", name));
                }
                if edges.windows(2).any(|w| w[0] > w[1]) {
                    return Err(format!("{} is not sorted ascending", name));
                }
            }
        }

        if let Some((lower, upper)) = self.outlier_bounds() {
            if !(lower.is_finite() && upper.is_finite()) || lower > upper {
                return Err(format!(
                    "outlier bounds [{}, {}] are not a valid interval",
                    lower, upper
                ));
            }
        }
        Ok(())
    }

    /// Both IQR bounds, or `None` if either is absent
    pub fn outlier_bounds(&self) -> Option<(f64, f64)> {
        match (self.outlier_lower_bound, self.outlier_upper_bound) {
            (Some(lower), Some(upper)) => Some((lower, upper)),
            _ => None,
        }
    }
}

/// AQI band; also the index of the matching range indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthyForSensitive,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    /// Upper bounds are inclusive, so the bands partition `[0, inf)`
    pub fn from_aqi(aqi: f64) -> Self {
        if aqi <= 50.0 {
            AqiCategory::Good
        } else if aqi <= 100.0 {
            AqiCategory::Moderate
        } else if aqi <= 150.0 {
            AqiCategory::UnhealthyForSensitive
        } else if aqi <= 200.0 {
            AqiCategory::Unhealthy
        } else if aqi <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitive => "Unhealthy_for_Sensitive",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very_Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// Column name of the band's range indicator
    pub fn range_column(self) -> &'static str {
        match self {
            AqiCategory::Good => "In_Range_0_50",
            AqiCategory::Moderate => "In_Range_51_100",
            AqiCategory::UnhealthyForSensitive => "In_Range_101_150",
            AqiCategory::Unhealthy => "In_Range_151_200",
            AqiCategory::VeryUnhealthy => "In_Range_201_300",
            AqiCategory::Hazardous => "In_Range_300_plus",
        }
    }
}

/// Every feature the transform knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Value,
    Squared,
    Log,
    Sqrt,
    Cubed,
    Reciprocal,
    Bin10,
    Bin20,
    DistanceTo(u16),
    InRange(AqiCategory),
    CategoryEncoded,
    Outlier,
    Year,
    Month,
    Day,
    DayOfWeek,
    MonthSin,
    MonthCos,
    DayOfWeekSin,
    DayOfWeekCos,
    DaySin,
    DayCos,
    SeasonEncoded,
}

impl FeatureKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "AQI Value" => FeatureKind::Value,
            "AQI_Squared" => FeatureKind::Squared,
            "AQI_Log" => FeatureKind::Log,
            "AQI_Sqrt" => FeatureKind::Sqrt,
            "AQI_Cubed" => FeatureKind::Cubed,
            "AQI_Reciprocal" => FeatureKind::Reciprocal,
            "AQI_Bin_10" => FeatureKind::Bin10,
            "AQI_Bin_20" => FeatureKind::Bin20,
            "AQI_Category_Encoded" => FeatureKind::CategoryEncoded,
            "Is_Outlier" => FeatureKind::Outlier,
            "Year" => FeatureKind::Year,
            "Month" => FeatureKind::Month,
            "Day" => FeatureKind::Day,
            "DayOfWeek_Num" => FeatureKind::DayOfWeek,
            "Month_Sin" => FeatureKind::MonthSin,
            "Month_Cos" => FeatureKind::MonthCos,
            "DayOfWeek_Sin" => FeatureKind::DayOfWeekSin,
            "DayOfWeek_Cos" => FeatureKind::DayOfWeekCos,
            "Day_Sin" => FeatureKind::DaySin,
            "Day_Cos" => FeatureKind::DayCos,
            "Season_Encoded" => FeatureKind::SeasonEncoded,
            other => {
                if let Some(point) = other.strip_prefix("Distance_to_") {
                    let point: u16 = point.parse().ok()?;
                    return REFERENCE_POINTS
                        .contains(&point)
                        .then_some(FeatureKind::DistanceTo(point));
                }
                return AqiCategory::ALL
                    .into_iter()
                    .find(|c| c.range_column() == other)
                    .map(FeatureKind::InRange);
            }
        };
        Some(kind)
    }

    pub fn name(self) -> String {
        match self {
            FeatureKind::Value => "AQI Value".to_string(),
            FeatureKind::Squared => "AQI_Squared".to_string(),
            FeatureKind::Log => "AQI_Log".to_string(),
            FeatureKind::Sqrt => "AQI_Sqrt".to_string(),
            FeatureKind::Cubed => "AQI_Cubed".to_string(),
            FeatureKind::Reciprocal => "AQI_Reciprocal".to_string(),
            FeatureKind::Bin10 => "AQI_Bin_10".to_string(),
            FeatureKind::Bin20 => "AQI_Bin_20".to_string(),
            FeatureKind::DistanceTo(point) => format!("Distance_to_{}", point),
            FeatureKind::InRange(category) => category.range_column().to_string(),
            FeatureKind::CategoryEncoded => "AQI_Category_Encoded".to_string(),
            FeatureKind::Outlier => "Is_Outlier".to_string(),
            FeatureKind::Year => "Year".to_string(),
            FeatureKind::Month => "Month".to_string(),
            FeatureKind::Day => "Day".to_string(),
            FeatureKind::DayOfWeek => "DayOfWeek_Num".to_string(),
            FeatureKind::MonthSin => "Month_Sin".to_string(),
            FeatureKind::MonthCos => "Month_Cos".to_string(),
            FeatureKind::DayOfWeekSin => "DayOfWeek_Sin".to_string(),
            FeatureKind::DayOfWeekCos => "DayOfWeek_Cos".to_string(),
            FeatureKind::DaySin => "Day_Sin".to_string(),
            FeatureKind::DayCos => "Day_Cos".to_string(),
            FeatureKind::SeasonEncoded => "Season_Encoded".to_string(),
        }
    }

    /// All features in the order the training notebook produced them
    pub fn all() -> Vec<FeatureKind> {
        let mut kinds = vec![
            FeatureKind::Value,
            FeatureKind::Squared,
            FeatureKind::Log,
            FeatureKind::Sqrt,
            FeatureKind::Cubed,
            FeatureKind::Reciprocal,
            FeatureKind::Bin10,
            FeatureKind::Bin20,
        ];
        kinds.extend(REFERENCE_POINTS.into_iter().map(FeatureKind::DistanceTo));
        kinds.extend(AqiCategory::ALL.into_iter().map(FeatureKind::InRange));
        kinds.extend([
            FeatureKind::CategoryEncoded,
            FeatureKind::Outlier,
            FeatureKind::Year,
            FeatureKind::Month,
            FeatureKind::Day,
            FeatureKind::DayOfWeek,
            FeatureKind::MonthSin,
            FeatureKind::MonthCos,
            FeatureKind::DayOfWeekSin,
            FeatureKind::DayOfWeekCos,
            FeatureKind::DaySin,
            FeatureKind::DayCos,
            FeatureKind::SeasonEncoded,
        ]);
        kinds
    }
}

/// Column names for every known feature, in canonical order
pub fn default_feature_columns() -> Vec<String> {
    FeatureKind::all().into_iter().map(FeatureKind::name).collect()
}

/// Interior cut points of a bin-edge array
#[derive(Debug, Clone, PartialEq)]
struct Binning {
    cuts: Vec<f64>,
    bins: usize,
}

impl Binning {
    fn from_edges(edges: &[f64], bins: usize) -> Self {
        let cuts = if edges.len() > 2 {
            edges[1..edges.len() - 1].to_vec()
        } else {
            Vec::new()
        };
        Self { cuts, bins }
    }

    /// Same convention as the training pipeline: digitize against the
    /// interior cuts, shift down by one, then clamp into `[0, bins - 1]`
    fn index(&self, aqi: f64) -> f64 {
        let digitized = self.cuts.iter().take_while(|cut| **cut <= aqi).count() as i64;
        let max = self.bins.saturating_sub(1) as i64;
        (digitized - 1).clamp(0, max) as f64
    }
}

/// A column resolved against the deployment parameters
#[derive(Debug, Clone, PartialEq)]
enum Column {
    Plain(FeatureKind),
    Bin(Binning),
}

/// Errors from the one-shot `transform` helper
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Column-ordered feature transform bound to one set of deployment params
#[derive(Debug, Clone)]
pub struct FeatureTransform {
    names: Arc<[String]>,
    columns: Vec<Column>,
    outlier_bounds: Option<(f64, f64)>,
}

impl FeatureTransform {
    /// Resolve every column name; fails on the first name the transform
    /// cannot produce
    pub fn new(params: &DeploymentParams, feature_columns: &[String]) -> Result<Self, MappingError> {
        if feature_columns.is_empty() {
            return Err(MappingError::EmptyColumns);
        }

        let columns = feature_columns
            .iter()
            .map(|name| -> Result<Column, MappingError> {
                let kind = FeatureKind::from_name(name)
                    .ok_or_else(|| MappingError::UnknownColumn(name.clone()))?;
                let column = match kind {
                    FeatureKind::Bin10 => Column::Bin(Binning::from_edges(
                        params.aqi_bin_10_edges.as_deref().ok_or_else(|| {
                            MappingError::MissingParameter {
                                column: name.clone(),
                                param: "aqi_bin_10_edges",
                            }
                        })?,
                        10,
                    )),
                    FeatureKind::Bin20 => Column::Bin(Binning::from_edges(
                        params.aqi_bin_20_edges.as_deref().ok_or_else(|| {
                            MappingError::MissingParameter {
                                column: name.clone(),
                                param: "aqi_bin_20_edges",
                            }
                        })?,
                        20,
                    )),
                    other => Column::Plain(other),
                };
                Ok(column)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            names: feature_columns.to_vec().into(),
            columns,
            outlier_bounds: params.outlier_bounds(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build the feature vector for one reading on the given date
    pub fn transform(&self, aqi: f64, date: NaiveDate) -> Result<FeatureVector, ValidationError> {
        if !aqi.is_finite() {
            return Err(ValidationError::NotFinite {
                raw: aqi.to_string(),
            });
        }
        if aqi < 0.0 {
            return Err(ValidationError::Negative { value: aqi });
        }

        let reading = Reading {
            aqi,
            category: AqiCategory::from_aqi(aqi),
            outlier: self
                .outlier_bounds
                .map(|(lower, upper)| aqi < lower || aqi > upper)
                .unwrap_or(false),
            calendar: CalendarFeatures::from_date(date),
        };

        let values = self
            .columns
            .iter()
            .map(|column| match column {
                Column::Plain(kind) => reading.value(*kind),
                Column::Bin(binning) => binning.index(aqi),
            })
            .collect();

        Ok(FeatureVector::new(Arc::clone(&self.names), values))
    }
}

/// Build a feature vector without keeping the resolved transform around
pub fn transform(
    aqi: f64,
    params: &DeploymentParams,
    feature_columns: &[String],
    date: NaiveDate,
) -> Result<FeatureVector, TransformError> {
    let transform = FeatureTransform::new(params, feature_columns)?;
    Ok(transform.transform(aqi, date)?)
}

/// Per-reading values shared by several columns
struct Reading {
    aqi: f64,
    category: AqiCategory,
    outlier: bool,
    calendar: CalendarFeatures,
}

impl Reading {
    fn value(&self, kind: FeatureKind) -> f64 {
        let aqi = self.aqi;
        let cal = &self.calendar;
        match kind {
            FeatureKind::Value => aqi,
            FeatureKind::Squared => aqi.powi(2),
            FeatureKind::Log => aqi.ln_1p(),
            FeatureKind::Sqrt => aqi.sqrt(),
            FeatureKind::Cubed => aqi.powi(3),
            FeatureKind::Reciprocal => 1.0 / (aqi + 1.0),
            FeatureKind::Bin10 | FeatureKind::Bin20 => {
                unreachable!("bin columns are resolved into Column::Bin by FeatureTransform::new")
            }
            FeatureKind::DistanceTo(point) => (aqi - point as f64).abs(),
            FeatureKind::InRange(category) => flag(self.category == category),
            FeatureKind::CategoryEncoded => self.category.code() as f64,
            FeatureKind::Outlier => flag(self.outlier),
            FeatureKind::Year => cal.year as f64,
            FeatureKind::Month => cal.month as f64,
            FeatureKind::Day => cal.day as f64,
            FeatureKind::DayOfWeek => cal.day_of_week as f64,
            FeatureKind::MonthSin => cal.month_cycle().0,
            FeatureKind::MonthCos => cal.month_cycle().1,
            FeatureKind::DayOfWeekSin => cal.day_of_week_cycle().0,
            FeatureKind::DayOfWeekCos => cal.day_of_week_cycle().1,
            FeatureKind::DaySin => cal.day_cycle().0,
            FeatureKind::DayCos => cal.day_cycle().1,
            FeatureKind::SeasonEncoded => cal.season.code() as f64,
        }
    }
}

fn flag(set: bool) -> f64 {
    if set {
        1.0
    } else {
        0.0
    }
}
