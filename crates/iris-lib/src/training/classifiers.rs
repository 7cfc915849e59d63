//! Classifier families and their persisted artifact format
//!
//! Each family is fitted with linfa and then reduced to the parameters it
//! needs at inference time, so artifacts are plain JSON and serving does not
//! depend on a solver being present.

use super::{ModelKind, TrainingError};
use crate::models::NUM_FEATURES;
use crate::predictor::Classifier;
use anyhow::{bail, Result};
use linfa::prelude::*;
use linfa_logistic::MultiLogisticRegression;
use linfa_svm::Svm;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Alphas at or below this magnitude do not define a support vector
const SUPPORT_VECTOR_EPS: f64 = 100.0 * f64::EPSILON;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub max_iterations: u64,
    /// L2 regularization strength
    pub alpha: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// RBF kernel width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// 1 / (n_features * var(X))
    Scale,
    Fixed(f64),
}

/// One-vs-rest RBF SVM settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub c: f64,
    pub gamma: Gamma,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: Gamma::Scale,
        }
    }
}

fn fit_error(kind: ModelKind, e: impl std::fmt::Display) -> TrainingError {
    TrainingError::Fit {
        kind,
        message: e.to_string(),
    }
}

/// Sorted distinct labels
fn sorted_classes(y: &Array1<usize>) -> Vec<usize> {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

fn check_columns(rows: &Array2<f64>, expected: usize) -> Result<()> {
    if rows.ncols() != expected {
        bail!("Expected {} feature columns, got {}", expected, rows.ncols());
    }
    Ok(())
}

/// Row-wise softmax, shifted by the row maximum
fn softmax_rows(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    scores
}

/// Multinomial logistic regression: softmax(x·W + b)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    classes: Vec<usize>,
    /// (n_features, n_classes)
    weights: Array2<f64>,
    intercept: Array1<f64>,
}

impl LogisticModel {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<usize>,
        params: &LogisticParams,
    ) -> Result<Self, TrainingError> {
        let kind = ModelKind::LogisticRegression;
        let classes = sorted_classes(y);
        let dataset = Dataset::new(x.clone(), y.clone());

        let fitted = MultiLogisticRegression::<f64>::default()
            .max_iterations(params.max_iterations)
            .alpha(params.alpha)
            .fit(&dataset)
            .map_err(|e| fit_error(kind, e))?;

        let model = Self {
            classes,
            weights: fitted.params().to_owned(),
            intercept: fitted.intercept().to_owned(),
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), TrainingError> {
        let (n_features, n_classes) = self.weights.dim();
        if n_features != NUM_FEATURES
            || n_classes != self.classes.len()
            || self.intercept.len() != n_classes
        {
            return Err(TrainingError::Artifact(format!(
                "logistic regression weights {:?} do not match {} classes",
                self.weights.dim(),
                self.classes.len()
            )));
        }
        Ok(())
    }

    fn predict_proba(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        check_columns(rows, self.weights.nrows())?;
        let logits = rows.dot(&self.weights) + &self.intercept;
        Ok(softmax_rows(logits))
    }
}

/// Bagged decision trees; probability is the share of trees voting for a class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    classes: Vec<usize>,
    trees: Vec<DecisionTree<f64, usize>>,
}

impl ForestModel {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<usize>,
        params: &ForestParams,
    ) -> Result<Self, TrainingError> {
        let kind = ModelKind::RandomForest;
        if params.n_estimators == 0 {
            return Err(fit_error(kind, "n_estimators must be positive"));
        }

        let classes = sorted_classes(y);
        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            // Bootstrap sample, drawn with replacement
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let dataset = Dataset::new(x.select(Axis(0), &sample), y.select(Axis(0), &sample));

            let tree = DecisionTree::<f64, usize>::params()
                .max_depth(Some(params.max_depth))
                .min_weight_split(params.min_samples_split as f32)
                .min_weight_leaf(params.min_samples_leaf as f32)
                .fit(&dataset)
                .map_err(|e| fit_error(kind, e))?;
            trees.push(tree);
        }

        Ok(Self { classes, trees })
    }

    fn validate(&self) -> Result<(), TrainingError> {
        if self.trees.is_empty() || self.classes.is_empty() {
            return Err(TrainingError::Artifact(
                "random forest has no trees or classes".to_string(),
            ));
        }
        Ok(())
    }

    fn predict_proba(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        check_columns(rows, NUM_FEATURES)?;
        let mut votes = Array2::<f64>::zeros((rows.nrows(), self.classes.len()));

        for tree in &self.trees {
            let predicted: Array1<usize> = tree.predict(rows);
            for (i, label) in predicted.iter().enumerate() {
                if let Ok(col) = self.classes.binary_search(label) {
                    votes[[i, col]] += 1.0;
                }
            }
        }

        votes /= self.trees.len() as f64;
        Ok(votes)
    }
}

/// One binary RBF machine of a one-vs-rest SVM
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryMachine {
    /// Signed dual coefficients of the support vectors
    alpha: Vec<f64>,
    support_vectors: Array2<f64>,
    rho: f64,
}

impl BinaryMachine {
    fn decision(&self, x: ArrayView1<f64>, eps: f64) -> f64 {
        let sum: f64 = self
            .support_vectors
            .rows()
            .into_iter()
            .zip(&self.alpha)
            .map(|(sv, a)| {
                let sq_dist: f64 = sv.iter().zip(x.iter()).map(|(s, v)| (s - v).powi(2)).sum();
                a * (-sq_dist / eps).exp()
            })
            .sum();
        sum - self.rho
    }
}

/// One-vs-rest RBF support vector classifier.
///
/// The kernel is `exp(-||x - x'||² / eps)`; probabilities are the softmax of
/// the per-class decision values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmModel {
    classes: Vec<usize>,
    eps: f64,
    machines: Vec<BinaryMachine>,
}

impl SvmModel {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<usize>,
        params: &SvmParams,
    ) -> Result<Self, TrainingError> {
        let kind = ModelKind::Svm;
        let classes = sorted_classes(y);
        let eps = kernel_eps(x, params.gamma);

        let mut machines = Vec::with_capacity(classes.len());
        for &class in &classes {
            let targets = y.mapv(|label| label == class);
            let dataset = Dataset::new(x.clone(), targets);

            let svm = Svm::<f64, bool>::params()
                .pos_neg_weights(params.c, params.c)
                .gaussian_kernel(eps)
                .fit(&dataset)
                .map_err(|e| fit_error(kind, e))?;

            let support: Vec<usize> = svm
                .alpha
                .iter()
                .enumerate()
                .filter(|(_, a)| a.abs() > SUPPORT_VECTOR_EPS)
                .map(|(i, _)| i)
                .collect();

            machines.push(BinaryMachine {
                alpha: support.iter().map(|&i| svm.alpha[i]).collect(),
                support_vectors: x.select(Axis(0), &support),
                rho: svm.rho,
            });
        }

        Ok(Self {
            classes,
            eps,
            machines,
        })
    }

    fn validate(&self) -> Result<(), TrainingError> {
        let consistent = self.eps > 0.0
            && self.machines.len() == self.classes.len()
            && self.machines.iter().all(|m| {
                m.alpha.len() == m.support_vectors.nrows()
                    && m.support_vectors.ncols() == NUM_FEATURES
            });
        if !consistent {
            return Err(TrainingError::Artifact(
                "svm machines do not match classes or feature count".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-class decision values, one row per input row
    pub fn decision_function(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        check_columns(rows, NUM_FEATURES)?;
        let mut scores = Array2::<f64>::zeros((rows.nrows(), self.machines.len()));
        for (i, row) in rows.rows().into_iter().enumerate() {
            for (j, machine) in self.machines.iter().enumerate() {
                scores[[i, j]] = machine.decision(row, self.eps);
            }
        }
        Ok(scores)
    }

    fn predict_proba(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(softmax_rows(self.decision_function(rows)?))
    }
}

/// Kernel width for the linfa Gaussian kernel, `eps = 1 / gamma`
fn kernel_eps(x: &Array2<f64>, gamma: Gamma) -> f64 {
    match gamma {
        Gamma::Fixed(g) if g > 0.0 => 1.0 / g,
        Gamma::Fixed(_) => 1.0,
        Gamma::Scale => {
            let n = x.len() as f64;
            if n == 0.0 {
                return 1.0;
            }
            let mean = x.sum() / n;
            let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            if var > 0.0 {
                x.ncols() as f64 * var
            } else {
                1.0
            }
        }
    }
}

/// A trained classifier of any supported family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    LogisticRegression(LogisticModel),
    RandomForest(ForestModel),
    Svm(SvmModel),
}

impl TrainedModel {
    /// Fit `kind` with its fixed hyperparameters
    pub fn train(
        kind: ModelKind,
        x: &Array2<f64>,
        y: &Array1<usize>,
    ) -> Result<Self, TrainingError> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(fit_error(
                kind,
                format!("{} rows with {} labels", x.nrows(), y.len()),
            ));
        }

        Ok(match kind {
            ModelKind::LogisticRegression => TrainedModel::LogisticRegression(LogisticModel::fit(
                x,
                y,
                &LogisticParams::default(),
            )?),
            ModelKind::RandomForest => {
                TrainedModel::RandomForest(ForestModel::fit(x, y, &ForestParams::default())?)
            }
            ModelKind::Svm => TrainedModel::Svm(SvmModel::fit(x, y, &SvmParams::default())?),
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::LogisticRegression(_) => ModelKind::LogisticRegression,
            TrainedModel::RandomForest(_) => ModelKind::RandomForest,
            TrainedModel::Svm(_) => ModelKind::Svm,
        }
    }

    fn validate(&self) -> Result<(), TrainingError> {
        match self {
            TrainedModel::LogisticRegression(m) => m.validate(),
            TrainedModel::RandomForest(m) => m.validate(),
            TrainedModel::Svm(m) => m.validate(),
        }
    }

    /// Serialize as a JSON artifact
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, TrainingError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a JSON artifact
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, TrainingError> {
        let model: TrainedModel = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    /// Write the artifact to `path` via a temp file and rename
    pub fn save(&self, path: &Path) -> Result<(), TrainingError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, self.to_json_bytes()?)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        Self::from_json_bytes(&fs::read(path)?)
    }
}

impl Classifier for TrainedModel {
    fn classes(&self) -> &[usize] {
        match self {
            TrainedModel::LogisticRegression(m) => &m.classes,
            TrainedModel::RandomForest(m) => &m.classes,
            TrainedModel::Svm(m) => &m.classes,
        }
    }

    fn predict_proba(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            TrainedModel::LogisticRegression(m) => m.predict_proba(rows),
            TrainedModel::RandomForest(m) => m.predict_proba(rows),
            TrainedModel::Svm(m) => m.predict_proba(rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{fetch_data, DEFAULT_SEED, DEFAULT_TEST_SIZE, MODELS};
    use ndarray::array;
    use tempfile::TempDir;

    fn accuracy(model: &TrainedModel, x: &Array2<f64>, y: &Array1<usize>) -> f64 {
        let predicted = Classifier::predict(model, x).unwrap();
        let correct = predicted.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        correct as f64 / y.len() as f64
    }

    fn assert_probabilities_valid(model: &TrainedModel, x: &Array2<f64>) {
        let proba = model.predict_proba(x).unwrap();
        assert_eq!(proba.dim(), (x.nrows(), 3));
        for row in proba.rows() {
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_softmax_rows_normalizes() {
        let out = softmax_rows(array![[1.0, 2.0, 3.0], [1000.0, 0.0, 0.0]]);
        assert!((out.row(0).sum() - 1.0).abs() < 1e-12);
        assert!(out[[0, 2]] > out[[0, 1]]);
        assert!((out[[1, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kernel_eps_scale() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        // var = 1, n_features = 2
        assert!((kernel_eps(&x, Gamma::Scale) - 2.0).abs() < 1e-12);
        assert!((kernel_eps(&x, Gamma::Fixed(0.5)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_family_learns_iris() {
        let split = fetch_data(DEFAULT_TEST_SIZE, DEFAULT_SEED).unwrap();
        for kind in MODELS {
            let model = TrainedModel::train(kind, &split.x_train, &split.y_train).unwrap();
            assert_eq!(model.kind(), kind);
            assert_eq!(model.classes(), &[0, 1, 2]);
            assert_probabilities_valid(&model, &split.x_test);
            let acc = accuracy(&model, &split.x_test, &split.y_test);
            assert!(acc >= 0.8, "{} accuracy {}", kind, acc);
        }
    }

    #[test]
    fn test_setosa_predicted_confidently() {
        let split = fetch_data(DEFAULT_TEST_SIZE, DEFAULT_SEED).unwrap();
        let model =
            TrainedModel::train(ModelKind::RandomForest, &split.x_train, &split.y_train).unwrap();
        let proba = model.predict_proba(&array![[5.1, 3.5, 1.4, 0.2]]).unwrap();
        assert!(proba[[0, 0]] >= 0.9);
    }

    #[test]
    fn test_artifact_save_load() {
        let dir = TempDir::new().unwrap();
        let split = fetch_data(DEFAULT_TEST_SIZE, DEFAULT_SEED).unwrap();
        let model =
            TrainedModel::train(ModelKind::LogisticRegression, &split.x_train, &split.y_train)
                .unwrap();

        let path = dir.path().join("artifacts/model.json");
        model.save(&path).unwrap();
        let loaded = TrainedModel::load(&path).unwrap();

        assert_eq!(loaded.kind(), ModelKind::LogisticRegression);
        assert_eq!(
            Classifier::predict(&loaded, &split.x_test).unwrap(),
            Classifier::predict(&model, &split.x_test).unwrap()
        );
    }

    #[test]
    fn test_inconsistent_artifact_rejected() {
        let bytes = br#"{"kind":"svm","classes":[0,1,2],"eps":1.0,"machines":[]}"#;
        assert!(matches!(
            TrainedModel::from_json_bytes(bytes),
            Err(TrainingError::Artifact(_))
        ));
        assert!(TrainedModel::from_json_bytes(b"not json").is_err());
    }

    #[test]
    fn test_wrong_column_count_is_an_error() {
        let split = fetch_data(DEFAULT_TEST_SIZE, DEFAULT_SEED).unwrap();
        let model = TrainedModel::train(ModelKind::Svm, &split.x_train, &split.y_train).unwrap();
        assert!(model.predict_proba(&array![[1.0, 2.0]]).is_err());
    }
}
