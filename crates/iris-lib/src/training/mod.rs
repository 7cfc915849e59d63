//! Offline training of the Iris classifiers
//!
//! Provides:
//! - Deterministic dataset fetch and train/test split
//! - Logistic regression, random forest and SVM classifiers with fixed
//!   hyperparameters, serializable as JSON artifacts
//! - Weighted classification metrics
//! - The train, compare, register pipeline

mod classifiers;
mod dataset;
mod evaluate;
mod pipeline;

pub use classifiers::{
    ForestModel, ForestParams, Gamma, LogisticModel, LogisticParams, SvmModel, SvmParams,
    TrainedModel,
};
pub use dataset::{fetch_data, IrisSplit, DEFAULT_SEED, DEFAULT_TEST_SIZE};
pub use evaluate::{evaluate, ClassReport, Evaluation};
pub use pipeline::{
    select_best, PipelineConfig, PipelineReport, TrainingOutcome, TrainingPipeline,
    TrainingResult,
};

use crate::registry::RegistryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed to train {kind}: {message}")]
    Fit { kind: ModelKind, message: String },

    #[error("invalid model artifact: {0}")]
    Artifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("no model trained successfully")]
    NoSuccessfulModel,
}

/// The classifier families trained by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    RandomForest,
    Svm,
}

/// Training order of the pipeline
pub const MODELS: [ModelKind; 3] = [
    ModelKind::LogisticRegression,
    ModelKind::RandomForest,
    ModelKind::Svm,
];

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::RandomForest => "random_forest",
            ModelKind::Svm => "svm",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "Logistic Regression",
            ModelKind::RandomForest => "Random Forest",
            ModelKind::Svm => "Support Vector Machine",
        }
    }

    /// Name the winning model is registered under
    pub fn registry_name(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "demo-iris-LR",
            ModelKind::RandomForest => "demo-iris-RF",
            ModelKind::Svm => "demo-iris-SVM",
        }
    }

    /// Fixed hyperparameters, as reported in training results
    pub fn hyperparameters(&self) -> serde_json::Value {
        let params = match self {
            ModelKind::LogisticRegression => serde_json::to_value(LogisticParams::default()),
            ModelKind::RandomForest => serde_json::to_value(ForestParams::default()),
            ModelKind::Svm => serde_json::to_value(SvmParams::default()),
        };
        params.unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MODELS
            .iter()
            .copied()
            .find(|kind| kind.name() == s || kind.registry_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model kind '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_order_and_registry_names() {
        let names: Vec<&str> = MODELS.iter().map(|k| k.registry_name()).collect();
        assert_eq!(names, vec!["demo-iris-LR", "demo-iris-RF", "demo-iris-SVM"]);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("random_forest".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert_eq!("demo-iris-svm".parse::<ModelKind>().unwrap(), ModelKind::Svm);
        assert!("xgboost".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_hyperparameters_reported() {
        let params = ModelKind::RandomForest.hyperparameters();
        assert_eq!(params["n_estimators"], 100);
        assert_eq!(params["max_depth"], 10);
        assert_eq!(ModelKind::LogisticRegression.hyperparameters()["max_iterations"], 200);
    }
}
