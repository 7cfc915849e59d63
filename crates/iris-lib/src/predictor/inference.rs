//! Model handle and inference adapter
//!
//! The handle is created once at startup, either loaded with a classifier
//! or permanently unloaded, and is shared read-only by every request.

use super::features::{to_matrix, FeatureRow};
use super::output::{ClassPrediction, OutputFormatter};
use super::Classifier;
use crate::error::ServingError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Version reported while no model is loaded
pub const UNLOADED_VERSION: &str = "0.0.0";

/// Inference slower than this is logged as a warning
pub const MAX_INFERENCE_MS: u128 = 5;

/// Result of a single-row inference
#[derive(Debug, Clone, Copy)]
pub struct Inference {
    pub class: usize,
    pub probability: f64,
    pub latency: Duration,
}

impl Inference {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Result of a batch inference, in input row order
#[derive(Debug, Clone)]
pub struct BatchInference {
    pub classes: Vec<usize>,
    pub probabilities: Vec<f64>,
    pub latency: Duration,
}

impl BatchInference {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// The process-wide model: a classifier plus its declared name and version
pub struct ModelHandle {
    classifier: Option<Arc<dyn Classifier>>,
    name: String,
    version: String,
    output_formatter: OutputFormatter,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
}

impl ModelHandle {
    /// Create a handle with no model; every prediction fails with ModelUnavailable
    pub fn unloaded(name: impl Into<String>) -> Self {
        Self {
            classifier: None,
            name: name.into(),
            version: UNLOADED_VERSION.to_string(),
            output_formatter: OutputFormatter::new(),
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
        }
    }

    /// Create a handle around a loaded classifier
    pub fn loaded(
        name: impl Into<String>,
        version: impl Into<String>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            classifier: Some(classifier),
            name: name.into(),
            version: version.into(),
            output_formatter: OutputFormatter::new(),
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn classifier(&self) -> Result<&dyn Classifier, ServingError> {
        self.classifier.as_deref().ok_or(ServingError::ModelUnavailable)
    }

    /// Predict the class and confidence of one validated row
    pub fn predict(&self, features: &FeatureRow) -> Result<Inference, ServingError> {
        let batch = self.predict_batch(std::slice::from_ref(features))?;
        match (batch.classes.first(), batch.probabilities.first()) {
            (Some(&class), Some(&probability)) => Ok(Inference {
                class,
                probability,
                latency: batch.latency,
            }),
            _ => Err(ServingError::Internal("Model returned no output".to_string())),
        }
    }

    /// Predict every row of a validated batch, preserving row order
    pub fn predict_batch(&self, rows: &[FeatureRow]) -> Result<BatchInference, ServingError> {
        let classifier = self.classifier()?;
        let start = Instant::now();

        let input = to_matrix(rows);
        let probabilities = classifier.predict_proba(&input)?;
        if probabilities.nrows() != rows.len() {
            return Err(ServingError::Internal(format!(
                "Model returned {} rows for {} inputs",
                probabilities.nrows(),
                rows.len()
            )));
        }

        let (classes, confidences): (Vec<usize>, Vec<f64>) = probabilities
            .rows()
            .into_iter()
            .map(|row| {
                let p = self.output_formatter.format(row, classifier.classes());
                (p.class, p.probability)
            })
            .unzip();

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);

        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis(),
                rows = rows.len(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros(), rows = rows.len(), "Inference completed");
        }

        Ok(BatchInference {
            classes,
            probabilities: confidences,
            latency: elapsed,
        })
    }

    /// Whether a served prediction falls below the low-confidence threshold
    pub fn is_low_confidence(&self, inference: &Inference) -> bool {
        self.output_formatter.is_low_confidence(&ClassPrediction {
            class: inference.class,
            probability: inference.probability,
        })
    }

    /// Get inference statistics
    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Inference statistics
#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
}
