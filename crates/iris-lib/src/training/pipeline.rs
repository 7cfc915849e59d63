//! Train every model kind, compare them, and promote the best
//!
//! Each kind trains in its own run with its own run id. A failure in one kind
//! is recorded and the loop moves on. The most accurate model (first one on a
//! tie) is registered under its registry name and moved to Production without
//! archiving earlier Production versions.

use super::dataset::{fetch_data, IrisSplit, DEFAULT_SEED, DEFAULT_TEST_SIZE};
use super::evaluate::{evaluate, Evaluation};
use super::{ModelKind, TrainedModel, TrainingError, MODELS};
use crate::models::{ModelScores, RegisteredModelVersion, Stage};
use crate::predictor::Classifier;
use crate::registry::ModelRegistry;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Fits one model kind on the training split
pub type Trainer =
    fn(ModelKind, &Array2<f64>, &Array1<usize>) -> Result<TrainedModel, TrainingError>;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Kinds to train, in order
    pub models: Vec<ModelKind>,
    pub trainer: Trainer,
    /// Root for per-run artifacts and the comparison summary
    pub artifacts_dir: PathBuf,
    /// Save the split as train.csv / test.csv here
    pub data_dir: Option<PathBuf>,
    /// Copy the winning artifact here for the serving API
    pub export_path: Option<PathBuf>,
    pub test_size: f64,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: MODELS.to_vec(),
            trainer: TrainedModel::train,
            artifacts_dir: PathBuf::from("artifacts"),
            data_dir: Some(PathBuf::from("data")),
            export_path: None,
            test_size: DEFAULT_TEST_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

/// A successfully trained and evaluated model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub run_id: String,
    pub model_kind: ModelKind,
    pub display_name: String,
    pub registry_name: String,
    pub hyperparameters: serde_json::Value,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Artifact written for this run
    pub artifact_path: PathBuf,
}

impl TrainingResult {
    pub fn scores(&self) -> ModelScores {
        ModelScores {
            accuracy: self.accuracy,
            precision: self.precision,
            recall: self.recall,
            f1: self.f1,
        }
    }
}

/// Result of training one kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained(TrainingResult),
    Failed { model_kind: ModelKind, error: String },
}

impl TrainingOutcome {
    pub fn model_kind(&self) -> ModelKind {
        match self {
            TrainingOutcome::Trained(r) => r.model_kind,
            TrainingOutcome::Failed { model_kind, .. } => *model_kind,
        }
    }
}

/// Everything a pipeline run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub outcomes: Vec<TrainingOutcome>,
    pub best: TrainingResult,
    /// Registry entry of the promoted model, when registration succeeded
    pub registered: Option<RegisteredModelVersion>,
    pub registration_error: Option<String>,
    pub comparison_path: PathBuf,
    pub exported_to: Option<PathBuf>,
}

/// Highest accuracy wins; on a tie the earliest result is kept
pub fn select_best(results: &[TrainingResult]) -> Option<&TrainingResult> {
    results.iter().fold(None, |best: Option<&TrainingResult>, r| match best {
        Some(b) if b.accuracy >= r.accuracy => Some(b),
        _ => Some(r),
    })
}

/// The training and registration pipeline
pub struct TrainingPipeline {
    config: PipelineConfig,
    registry: Option<ModelRegistry>,
}

impl TrainingPipeline {
    /// Create a pipeline. Without a registry the best model is selected and
    /// exported but not registered.
    pub fn new(config: PipelineConfig, registry: Option<ModelRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn run(&self) -> Result<PipelineReport, TrainingError> {
        let split = fetch_data(self.config.test_size, self.config.seed)?;
        info!(
            event = "data_fetched",
            train_samples = split.x_train.nrows(),
            test_samples = split.x_test.nrows(),
            "Dataset split"
        );

        if let Some(data_dir) = &self.config.data_dir {
            let (train, test) = split.save_csv(data_dir)?;
            info!(train = %train.display(), test = %test.display(), "Saved dataset split");
        }

        let total = self.config.models.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut trained: Vec<(TrainingResult, TrainedModel)> = Vec::new();

        for (i, kind) in self.config.models.iter().copied().enumerate() {
            info!(
                event = "training_started",
                model = %kind,
                step = i + 1,
                total = total,
                "Training {}",
                kind.display_name()
            );

            match self.train_one(kind, &split) {
                Ok((result, model)) => {
                    info!(
                        event = "training_completed",
                        model = %kind,
                        run_id = %result.run_id,
                        accuracy = result.accuracy,
                        precision = result.precision,
                        recall = result.recall,
                        f1 = result.f1,
                        "Model trained and evaluated"
                    );
                    outcomes.push(TrainingOutcome::Trained(result.clone()));
                    trained.push((result, model));
                }
                Err(e) => {
                    warn!(
                        event = "training_failed",
                        model = %kind,
                        error = %e,
                        "Model training failed"
                    );
                    outcomes.push(TrainingOutcome::Failed {
                        model_kind: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        let results: Vec<TrainingResult> = trained.iter().map(|(r, _)| r.clone()).collect();
        let best = select_best(&results).cloned();
        let comparison_path = self.save_comparison(&outcomes, best.as_ref())?;

        let best = best.ok_or(TrainingError::NoSuccessfulModel)?;
        let best_model = trained
            .iter()
            .find(|(r, _)| r.run_id == best.run_id)
            .map(|(_, m)| m)
            .ok_or(TrainingError::NoSuccessfulModel)?;

        info!(
            event = "best_model_selected",
            model = %best.model_kind,
            accuracy = best.accuracy,
            registry_name = %best.registry_name,
            "Best model selected"
        );

        let (registered, registration_error) = match &self.registry {
            Some(registry) => match register_best(registry, &best, best_model) {
                Ok(version) => (Some(version), None),
                Err(e) => {
                    warn!(
                        event = "registration_failed",
                        error = %e,
                        "Failed to register best model"
                    );
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        let exported_to = match &self.config.export_path {
            Some(path) => {
                best_model.save(path)?;
                info!(
                    event = "model_exported",
                    path = %path.display(),
                    "Best model exported for serving"
                );
                Some(path.clone())
            }
            None => None,
        };

        Ok(PipelineReport {
            outcomes,
            best,
            registered,
            registration_error,
            comparison_path,
            exported_to,
        })
    }

    /// Train, evaluate and persist one kind in a fresh run
    fn train_one(
        &self,
        kind: ModelKind,
        split: &IrisSplit,
    ) -> Result<(TrainingResult, TrainedModel), TrainingError> {
        let run_id = Uuid::new_v4().simple().to_string();
        let model = (self.config.trainer)(kind, &split.x_train, &split.y_train)?;

        let predicted = Classifier::predict(&model, &split.x_test)
            .map_err(|e| TrainingError::Artifact(e.to_string()))?;
        let evaluation = evaluate(&split.y_test.to_vec(), &predicted);

        let run_dir = self.config.artifacts_dir.join("runs").join(&run_id);
        let artifact_path = run_dir.join("model.json");
        model.save(&artifact_path)?;
        save_evaluation(&run_dir, &evaluation)?;

        let scores = evaluation.scores;
        let result = TrainingResult {
            run_id,
            model_kind: kind,
            display_name: kind.display_name().to_string(),
            registry_name: kind.registry_name().to_string(),
            hyperparameters: kind.hyperparameters(),
            accuracy: scores.accuracy,
            precision: scores.precision,
            recall: scores.recall,
            f1: scores.f1,
            artifact_path,
        };
        Ok((result, model))
    }

    /// Write model_comparison.json: scores per kind plus the winner
    fn save_comparison(
        &self,
        outcomes: &[TrainingOutcome],
        best: Option<&TrainingResult>,
    ) -> Result<PathBuf, TrainingError> {
        let mut models = BTreeMap::new();
        for outcome in outcomes {
            let value = match outcome {
                TrainingOutcome::Trained(r) => serde_json::to_value(r.scores())?,
                TrainingOutcome::Failed { error, .. } => serde_json::json!({ "error": error }),
            };
            models.insert(outcome.model_kind().name(), value);
        }

        let summary = serde_json::json!({
            "models": models,
            "best_model": best.map(|b| b.model_kind.name()),
        });

        fs::create_dir_all(&self.config.artifacts_dir)?;
        let path = self.config.artifacts_dir.join("model_comparison.json");
        fs::write(&path, serde_json::to_vec_pretty(&summary)?)?;
        Ok(path)
    }
}

fn save_evaluation(run_dir: &Path, evaluation: &Evaluation) -> Result<(), TrainingError> {
    fs::create_dir_all(run_dir)?;
    fs::write(
        run_dir.join("evaluation.json"),
        serde_json::to_vec_pretty(evaluation)?,
    )?;
    Ok(())
}

fn register_best(
    registry: &ModelRegistry,
    best: &TrainingResult,
    model: &TrainedModel,
) -> Result<RegisteredModelVersion, TrainingError> {
    let registered = registry.register(
        &best.registry_name,
        model,
        Some(&best.run_id),
        Some(best.scores()),
    )?;
    let promoted = registry.transition_stage(
        &best.registry_name,
        registered.version,
        Stage::Production,
        false,
    )?;
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(kind: ModelKind, accuracy: f64) -> TrainingResult {
        TrainingResult {
            run_id: format!("run-{}", kind),
            model_kind: kind,
            display_name: kind.display_name().to_string(),
            registry_name: kind.registry_name().to_string(),
            hyperparameters: kind.hyperparameters(),
            accuracy,
            precision: accuracy,
            recall: accuracy,
            f1: accuracy,
            artifact_path: PathBuf::from("model.json"),
        }
    }

    #[test]
    fn test_select_best_picks_highest_accuracy() {
        let results = vec![
            result(ModelKind::LogisticRegression, 0.90),
            result(ModelKind::RandomForest, 0.95),
            result(ModelKind::Svm, 0.93),
        ];
        assert_eq!(select_best(&results).unwrap().model_kind, ModelKind::RandomForest);
    }

    #[test]
    fn test_select_best_first_maximum_wins() {
        let results = vec![
            result(ModelKind::LogisticRegression, 0.97),
            result(ModelKind::RandomForest, 0.97),
        ];
        assert_eq!(
            select_best(&results).unwrap().model_kind,
            ModelKind::LogisticRegression
        );
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_full_pipeline_registers_and_exports() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            artifacts_dir: dir.path().join("artifacts"),
            data_dir: Some(dir.path().join("data")),
            export_path: Some(dir.path().join("serving/model.json")),
            ..PipelineConfig::default()
        };
        let registry = ModelRegistry::open(dir.path().join("registry"));
        let report = TrainingPipeline::new(config, Some(registry)).run().unwrap();

        assert_eq!(report.outcomes.len(), 3);
        let kinds: Vec<ModelKind> = report.outcomes.iter().map(|o| o.model_kind()).collect();
        assert_eq!(kinds, MODELS.to_vec());
        assert!(report.best.accuracy >= 0.9);
        assert!(report.comparison_path.exists());
        assert!(dir.path().join("data/train.csv").exists());
        assert!(report.best.artifact_path.exists());

        let registered = report.registered.expect("best model registered");
        assert_eq!(registered.stage, Stage::Production);
        assert_eq!(registered.registry_name, report.best.registry_name);
        assert_eq!(registered.run_id.as_deref(), Some(report.best.run_id.as_str()));

        let exported = TrainedModel::load(&report.exported_to.unwrap()).unwrap();
        assert_eq!(exported.kind(), report.best.model_kind);
    }

    /// Trainer whose random forest never converges
    fn forest_fails(
        kind: ModelKind,
        x: &Array2<f64>,
        y: &Array1<usize>,
    ) -> Result<TrainedModel, TrainingError> {
        if kind == ModelKind::RandomForest {
            return Err(TrainingError::Fit {
                kind,
                message: "solver diverged".to_string(),
            });
        }
        TrainedModel::train(kind, x, y)
    }

    fn always_fails(
        kind: ModelKind,
        _x: &Array2<f64>,
        _y: &Array1<usize>,
    ) -> Result<TrainedModel, TrainingError> {
        Err(TrainingError::Fit {
            kind,
            message: "solver diverged".to_string(),
        })
    }

    #[test]
    fn test_failed_model_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            trainer: forest_fails,
            artifacts_dir: dir.path().join("artifacts"),
            data_dir: None,
            ..PipelineConfig::default()
        };
        let registry = ModelRegistry::open(dir.path().join("registry"));
        let report = TrainingPipeline::new(config, Some(registry)).run().unwrap();

        assert_eq!(report.outcomes.len(), 3);
        match &report.outcomes[1] {
            TrainingOutcome::Failed { model_kind, error } => {
                assert_eq!(*model_kind, ModelKind::RandomForest);
                assert!(error.contains("solver diverged"));
            }
            other => panic!("expected a failed outcome, got {:?}", other),
        }
        assert!(matches!(report.outcomes[0], TrainingOutcome::Trained(_)));
        assert!(matches!(report.outcomes[2], TrainingOutcome::Trained(_)));
        assert_ne!(report.best.model_kind, ModelKind::RandomForest);
        assert!(report.registered.is_some());

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(&report.comparison_path).unwrap()).unwrap();
        assert!(summary["models"]["random_forest"]["error"].is_string());
        assert_eq!(summary["best_model"], report.best.model_kind.name());
    }

    #[test]
    fn test_no_successful_model_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            trainer: always_fails,
            artifacts_dir: dir.path().join("artifacts"),
            data_dir: None,
            ..PipelineConfig::default()
        };
        let err = TrainingPipeline::new(config, None).run().unwrap_err();
        assert!(matches!(err, TrainingError::NoSuccessfulModel));
        assert!(dir.path().join("artifacts/model_comparison.json").exists());
    }

    #[test]
    fn test_registration_failure_keeps_training_results() {
        let dir = TempDir::new().unwrap();
        // A regular file where the registry directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let config = PipelineConfig {
            models: vec![ModelKind::LogisticRegression],
            artifacts_dir: dir.path().join("artifacts"),
            data_dir: None,
            export_path: Some(dir.path().join("serving/model.json")),
            ..PipelineConfig::default()
        };
        let registry = ModelRegistry::open(blocker.join("registry"));
        let report = TrainingPipeline::new(config, Some(registry)).run().unwrap();

        assert!(report.registered.is_none());
        assert!(report
            .registration_error
            .as_deref()
            .is_some_and(|e| e.contains("registry error")));
        assert_eq!(report.best.model_kind, ModelKind::LogisticRegression);
        assert!(report.best.artifact_path.exists());
        assert!(report.exported_to.is_some_and(|path| path.exists()));
    }

    #[test]
    fn test_pipeline_without_registry() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            artifacts_dir: dir.path().join("artifacts"),
            data_dir: None,
            ..PipelineConfig::default()
        };
        let report = TrainingPipeline::new(config, None).run().unwrap();
        assert!(report.registered.is_none());
        assert!(report.registration_error.is_none());
        assert!(report.exported_to.is_none());
    }
}
