//! Commands that query a running serving API

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_probability, format_class, format_latency, format_timestamp, print_json, print_success,
    print_table, OutputFormat,
};

/// Row for batch prediction output
#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Row")]
    row: usize,
    #[tabled(rename = "Features")]
    features: String,
    #[tabled(rename = "Prediction")]
    prediction: String,
    #[tabled(rename = "Probability")]
    probability: String,
}

/// Row for the prediction log table
#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Request")]
    request_id: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Prediction")]
    prediction: String,
    #[tabled(rename = "Probability")]
    probability: String,
    #[tabled(rename = "Latency")]
    latency: String,
}

/// Parse a comma-separated feature row such as `5.1,3.5,1.4,0.2`
pub fn parse_row(row: &str) -> Result<Vec<f64>> {
    row.split(',')
        .map(|value| {
            let value = value.trim();
            value
                .parse::<f64>()
                .with_context(|| format!("Invalid feature value '{}'", value))
        })
        .collect()
}

fn format_features(features: &[f64]) -> String {
    features
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => print_success(&format!(
            "{} serving {} ({})",
            health.status.green(),
            health.model.cyan(),
            health.environment
        )),
    }

    Ok(())
}

pub async fn info(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info = client.info().await?;

    match format {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Table => {
            println!("{}", "Model Info".bold());
            println!("{}", "=".repeat(40));
            println!("Model:       {}", info.model_name.cyan());
            println!("Version:     {}", info.version);
            println!("Environment: {}", info.environment);
            println!("Canary:      {}%", info.canary_percentage);
        }
    }

    Ok(())
}

pub async fn predict(client: &ApiClient, features: Vec<f64>, format: OutputFormat) -> Result<()> {
    let response = client.predict(features).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!("Prediction:  {}", format_class(response.prediction).bold());
            println!("Probability: {}", color_probability(response.probability));
            println!("Latency:     {}", format_latency(response.latency_ms));
            println!("Model:       {} v{}", response.model, response.version);
            println!("Request ID:  {}", response.request_id);
        }
    }

    Ok(())
}

pub async fn predict_batch(
    client: &ApiClient,
    rows: &[String],
    format: OutputFormat,
) -> Result<()> {
    let features = rows
        .iter()
        .map(|row| parse_row(row))
        .collect::<Result<Vec<_>>>()?;
    let response = client.predict_batch(features.clone()).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let table_rows: Vec<BatchRow> = features
                .iter()
                .zip(response.predictions.iter().zip(&response.probabilities))
                .enumerate()
                .map(|(i, (f, (&prediction, &probability)))| BatchRow {
                    row: i,
                    features: format_features(f),
                    prediction: format_class(prediction),
                    probability: color_probability(probability),
                })
                .collect();
            print_table(table_rows, "No predictions returned");
            println!(
                "\nModel: {} v{}  Latency: {}",
                response.model,
                response.version,
                format_latency(response.latency_ms)
            );
        }
    }

    Ok(())
}

pub async fn logs(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let response = client.logs(limit).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let count = response.count;
            let rows: Vec<LogRow> = response
                .logs
                .iter()
                .map(|record| LogRow {
                    timestamp: format_timestamp(&record.timestamp),
                    request_id: record.request_id.clone(),
                    model: format!("{} v{}", record.model_name, record.model_version),
                    prediction: format_class(record.prediction.max(0) as usize),
                    probability: color_probability(record.probability),
                    latency: format_latency(record.latency_ms),
                })
                .collect();
            print_table(rows, "No predictions logged");
            println!("\nTotal: {} predictions", count);
        }
    }

    Ok(())
}
