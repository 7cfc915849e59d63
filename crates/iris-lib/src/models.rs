//! Core data models for the serving and training pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of input features expected by every classifier
pub const NUM_FEATURES: usize = 4;

/// Iris feature names, in input order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] =
    ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// Iris class names, indexed by predicted class
pub const CLASS_NAMES: [&str; 3] = ["setosa", "versicolor", "virginica"];

/// A single persisted prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Row id assigned by the store; absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub request_id: String,
    pub model_name: String,
    pub model_version: String,
    pub features: Vec<f64>,
    pub prediction: i64,
    pub probability: f64,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Build a record for a prediction made just now
    pub fn new(
        request_id: impl Into<String>,
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        features: Vec<f64>,
        prediction: usize,
        probability: f64,
        latency_ms: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            request_id: request_id.into(),
            model_name: model_name.into(),
            model_version: model_version.into(),
            features,
            prediction: prediction as i64,
            probability,
            latency_ms,
            timestamp: now,
            created_at: now,
        }
    }
}

/// Lifecycle stage of a registered model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// Classification metrics reported for a trained model
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A model version tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModelVersion {
    pub registry_name: String,
    pub version: u32,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<ModelScores>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
