//! Training pipeline command

use anyhow::{Context, Result};
use colored::Colorize;
use iris_lib::training::{PipelineConfig, PipelineReport, TrainingOutcome, TrainingPipeline};
use iris_lib::ModelRegistry;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{
    format_percent, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

/// Options for a training run
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub registry_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub register: bool,
    pub test_size: f64,
    pub seed: u64,
}

/// Row for the model comparison table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
}

impl From<&TrainingOutcome> for OutcomeRow {
    fn from(outcome: &TrainingOutcome) -> Self {
        match outcome {
            TrainingOutcome::Trained(r) => OutcomeRow {
                model: r.display_name.clone(),
                status: "trained".green().to_string(),
                accuracy: format_percent(r.accuracy),
                precision: format_percent(r.precision),
                recall: format_percent(r.recall),
                f1: format_percent(r.f1),
            },
            TrainingOutcome::Failed { model_kind, .. } => OutcomeRow {
                model: model_kind.display_name().to_string(),
                status: "failed".red().to_string(),
                accuracy: "-".to_string(),
                precision: "-".to_string(),
                recall: "-".to_string(),
                f1: "-".to_string(),
            },
        }
    }
}

/// Train every model, compare them and register the best one
pub async fn run_training(options: TrainOptions, format: OutputFormat) -> Result<()> {
    let config = PipelineConfig {
        artifacts_dir: options.artifacts_dir,
        data_dir: options.data_dir,
        export_path: options.export,
        test_size: options.test_size,
        seed: options.seed,
        ..PipelineConfig::default()
    };
    let registry = options
        .register
        .then(|| ModelRegistry::open(&options.registry_dir));

    // Fitting is CPU-bound
    let report = tokio::task::spawn_blocking(move || TrainingPipeline::new(config, registry).run())
        .await
        .context("Training task panicked")?
        .context("Training failed")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("{}", "Model Comparison".bold());
    let rows: Vec<OutcomeRow> = report.outcomes.iter().map(OutcomeRow::from).collect();
    print_table(rows, "No models were trained");

    for outcome in &report.outcomes {
        if let TrainingOutcome::Failed { model_kind, error } = outcome {
            print_warning(&format!("{} failed: {}", model_kind.display_name(), error));
        }
    }

    println!();
    print_success(&format!(
        "Best model: {} (accuracy {})",
        report.best.display_name.cyan(),
        format_percent(report.best.accuracy)
    ));

    match (&report.registered, &report.registration_error) {
        (Some(registered), _) => print_success(&format!(
            "Registered {} version {} in {}",
            registered.registry_name, registered.version, registered.stage
        )),
        (None, Some(error)) => print_warning(&format!("Registration failed: {}", error)),
        (None, None) => print_info("Registration skipped"),
    }

    if let Some(path) = &report.exported_to {
        print_info(&format!("Exported artifact to {}", path.display()));
    }
    print_info(&format!("Comparison written to {}", report.comparison_path.display()));
}
