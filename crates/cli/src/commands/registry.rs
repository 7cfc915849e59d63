//! Model registry commands

use anyhow::{Context, Result};
use iris_lib::{ModelRegistry, Stage};
use tabled::Tabled;

use crate::output::{
    color_stage, format_percent, format_timestamp, print_json, print_success, print_table,
    OutputFormat,
};

/// Row for the registered models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Versions")]
    versions: usize,
    #[tabled(rename = "Latest")]
    latest: u32,
    #[tabled(rename = "Production")]
    production: String,
}

/// Row for the model versions table
#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: u32,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Run")]
    run_id: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

/// List registered model names
pub fn list_models(registry: &ModelRegistry, format: OutputFormat) -> Result<()> {
    let models = registry
        .list_models()
        .context("Failed to read model registry")?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            let rows: Vec<ModelRow> = models
                .iter()
                .map(|m| ModelRow {
                    name: m.name.clone(),
                    versions: m.versions,
                    latest: m.latest_version,
                    production: m
                        .production_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_table(rows, "No registered models");
        }
    }

    Ok(())
}

/// List every version of one model
pub fn list_versions(registry: &ModelRegistry, name: &str, format: OutputFormat) -> Result<()> {
    let versions = registry
        .list_versions(name)
        .with_context(|| format!("Failed to list versions of '{}'", name))?;

    match format {
        OutputFormat::Json => print_json(&versions)?,
        OutputFormat::Table => {
            let rows: Vec<VersionRow> = versions
                .iter()
                .map(|v| VersionRow {
                    version: v.version,
                    stage: color_stage(v.stage),
                    accuracy: v
                        .scores
                        .map(|s| format_percent(s.accuracy))
                        .unwrap_or_else(|| "-".to_string()),
                    run_id: v.run_id.clone().unwrap_or_else(|| "-".to_string()),
                    created_at: format_timestamp(&v.created_at),
                })
                .collect();
            print_table(rows, "No versions registered");
        }
    }

    Ok(())
}

/// Move a version to another stage
pub fn promote(
    registry: &ModelRegistry,
    name: &str,
    version: u32,
    stage: Stage,
    archive_existing: bool,
    format: OutputFormat,
) -> Result<()> {
    let updated = registry
        .transition_stage(name, version, stage, archive_existing)
        .with_context(|| format!("Failed to move {} version {} to {}", name, version, stage))?;

    match format {
        OutputFormat::Json => print_json(&updated)?,
        OutputFormat::Table => print_success(&format!(
            "{} version {} is now in {}",
            name,
            version,
            color_stage(updated.stage)
        )),
    }

    Ok(())
}

/// Delete one version, or the whole model when no version is given
pub fn delete(registry: &ModelRegistry, name: &str, version: Option<u32>) -> Result<()> {
    match version {
        Some(version) => {
            registry
                .delete_version(name, version)
                .with_context(|| format!("Failed to delete {} version {}", name, version))?;
            print_success(&format!("Deleted {} version {}", name, version));
        }
        None => {
            registry
                .delete_model(name)
                .with_context(|| format!("Failed to delete model '{}'", name))?;
            print_success(&format!("Deleted model {}", name));
        }
    }

    Ok(())
}
