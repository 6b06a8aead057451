//! Feature transform, model artifacts and the prediction engine

mod artifacts;
mod calendar;
mod engine;
mod features;
mod inference;

pub use artifacts::{
    resolve_model_dir, ModelArtifacts, CLASSIFIER_FILE, DEFAULT_MODEL_DIRS, FEATURE_COLUMNS_FILE,
    LABEL_ENCODER_FILE, PARAMS_FILE, REQUIRED_FILES, SCALER_FILE,
};
pub use calendar::{cyclical, CalendarFeatures, Clock, FixedClock, Season, SystemClock};
pub use engine::{PredictionEngine, PROBABILITY_TOLERANCE};
pub use features::{
    default_feature_columns, transform, AqiCategory, DeploymentParams, FeatureKind,
    FeatureTransform, TransformError, REFERENCE_POINTS,
};
pub use inference::{
    argmax, ClassScores, Classifier, LabelDecoder, OnnxClassifier, Scaler, ScalerParams,
};
