//! Iris dataset fetch and deterministic train/test split

use super::TrainingError;
use crate::models::{FEATURE_NAMES, NUM_FEATURES};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Fraction of rows held out for evaluation
pub const DEFAULT_TEST_SIZE: f64 = 0.2;

/// Seed used for the split and every seeded model
pub const DEFAULT_SEED: u64 = 42;

/// A train/test partition of the Iris dataset
#[derive(Debug, Clone)]
pub struct IrisSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
}

/// Load the 150-row Iris dataset and split it.
///
/// The test partition holds `ceil(n * test_size)` rows; the same seed always
/// yields the same partition.
pub fn fetch_data(test_size: f64, seed: u64) -> Result<IrisSplit, TrainingError> {
    let dataset = linfa_datasets::iris();
    split(&dataset.records, &dataset.targets, test_size, seed)
}

pub(crate) fn split(
    records: &Array2<f64>,
    targets: &Array1<usize>,
    test_size: f64,
    seed: u64,
) -> Result<IrisSplit, TrainingError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TrainingError::Dataset(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    if records.nrows() != targets.len() {
        return Err(TrainingError::Dataset(format!(
            "{} feature rows but {} labels",
            records.nrows(),
            targets.len()
        )));
    }
    if records.ncols() != NUM_FEATURES {
        return Err(TrainingError::Dataset(format!(
            "expected {} feature columns, got {}",
            NUM_FEATURES,
            records.ncols()
        )));
    }

    let n = records.nrows();
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(TrainingError::Dataset(format!(
            "cannot hold out {} of {} rows",
            n_test, n
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok(IrisSplit {
        x_train: records.select(Axis(0), train_idx),
        x_test: records.select(Axis(0), test_idx),
        y_train: targets.select(Axis(0), train_idx),
        y_test: targets.select(Axis(0), test_idx),
    })
}

impl IrisSplit {
    /// Write `train.csv` and `test.csv` (feature columns plus `target`)
    pub fn save_csv(&self, output_dir: &Path) -> Result<(PathBuf, PathBuf), TrainingError> {
        fs::create_dir_all(output_dir)?;

        let train_path = output_dir.join("train.csv");
        let test_path = output_dir.join("test.csv");
        fs::write(&train_path, to_csv(&self.x_train, &self.y_train))?;
        fs::write(&test_path, to_csv(&self.x_test, &self.y_test))?;

        Ok((train_path, test_path))
    }
}

fn to_csv(x: &Array2<f64>, y: &Array1<usize>) -> String {
    let mut out = FEATURE_NAMES.join(",");
    out.push_str(",target\n");
    for (row, label) in x.rows().into_iter().zip(y.iter()) {
        for value in row.iter() {
            let _ = write!(out, "{},", value);
        }
        let _ = writeln!(out, "{}", label);
    }
    out
}
