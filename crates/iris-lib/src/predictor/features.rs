//! Feature validation for incoming prediction requests
//!
//! Every request must carry exactly four finite measurements per row
//! (sepal length, sepal width, petal length, petal width).

use crate::error::ServingError;
use crate::models::NUM_FEATURES;
use ndarray::Array2;

/// A validated feature vector
pub type FeatureRow = [f64; NUM_FEATURES];

/// Validate a single feature vector
pub fn validate_features(features: &[f64]) -> Result<FeatureRow, ServingError> {
    let row: FeatureRow = features.try_into().map_err(|_| {
        ServingError::InvalidInput(format!(
            "Features must have {} dimensions, got {}",
            NUM_FEATURES,
            features.len()
        ))
    })?;

    if row.iter().any(|v| !v.is_finite()) {
        return Err(ServingError::InvalidInput(
            "Features must be finite numbers".to_string(),
        ));
    }

    Ok(row)
}

/// Validate every row of a batch request
pub fn validate_batch(rows: &[Vec<f64>]) -> Result<Vec<FeatureRow>, ServingError> {
    if rows.is_empty() {
        return Err(ServingError::InvalidInput(
            "Batch must contain at least one feature vector".to_string(),
        ));
    }

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            validate_features(row)
                .map_err(|e| ServingError::InvalidInput(format!("Row {}: {}", i, e)))
        })
        .collect()
}

/// Stack validated rows into an (n, 4) matrix
pub(crate) fn to_matrix(rows: &[FeatureRow]) -> Array2<f64> {
    let mut matrix = Array2::zeros((rows.len(), NUM_FEATURES));
    for (mut target, row) in matrix.rows_mut().into_iter().zip(rows) {
        for (cell, value) in target.iter_mut().zip(row) {
            *cell = *value;
        }
    }
    matrix
}
