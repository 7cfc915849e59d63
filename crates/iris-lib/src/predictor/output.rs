//! Conversion of raw class probabilities into a served prediction

use ndarray::ArrayView1;

/// Probabilities below this are logged as low confidence
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// A predicted class and its confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassPrediction {
    pub class: usize,
    /// Maximum class probability, clamped to [0, 1]
    pub probability: f64,
}

/// Formats a probability row into a ClassPrediction
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    low_confidence_threshold: f64,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self {
            low_confidence_threshold: LOW_CONFIDENCE_THRESHOLD,
        }
    }

    /// Pick the most probable class. Ties go to the lowest column.
    ///
    /// # Arguments
    /// * `probabilities` - One probability per class, in `classes` order
    /// * `classes` - Class labels for each column
    pub fn format(&self, probabilities: ArrayView1<f64>, classes: &[usize]) -> ClassPrediction {
        let mut best_idx = 0;
        let mut best = f64::NEG_INFINITY;
        for (idx, &p) in probabilities.iter().enumerate() {
            if p > best {
                best = p;
                best_idx = idx;
            }
        }

        let probability = if best.is_finite() { best.clamp(0.0, 1.0) } else { 0.0 };
        let class = classes.get(best_idx).copied().unwrap_or(best_idx);

        ClassPrediction { class, probability }
    }

    /// Check if a prediction has low confidence
    pub fn is_low_confidence(&self, prediction: &ClassPrediction) -> bool {
        prediction.probability < self.low_confidence_threshold
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new()
    }
}
