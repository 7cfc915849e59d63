//! Inference engine for the serving path

mod features;
mod inference;
mod output;

pub use features::{validate_batch, validate_features, FeatureRow};
pub use inference::{
    BatchInference, Inference, InferenceStats, ModelHandle, MAX_INFERENCE_MS, UNLOADED_VERSION,
};
pub use output::{ClassPrediction, OutputFormatter, LOW_CONFIDENCE_THRESHOLD};

use anyhow::Result;
use ndarray::Array2;

/// Trait for trained classifiers that can serve predictions
pub trait Classifier: Send + Sync {
    /// Class labels, in the column order of `predict_proba`
    fn classes(&self) -> &[usize];

    /// Per-class probabilities, one row per input row
    fn predict_proba(&self, rows: &Array2<f64>) -> Result<Array2<f64>>;

    /// Predicted class label per input row
    fn predict(&self, rows: &Array2<f64>) -> Result<Vec<usize>> {
        let formatter = OutputFormatter::new();
        let probabilities = self.predict_proba(rows)?;
        Ok(probabilities
            .rows()
            .into_iter()
            .map(|row| formatter.format(row, self.classes()).class)
            .collect())
    }
}
