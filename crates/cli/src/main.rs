//! Iris CLI
//!
//! A command-line tool for training and registering Iris classifiers and
//! for querying a running serving API.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{registry, serving, train};
use iris_lib::training::{DEFAULT_SEED, DEFAULT_TEST_SIZE};
use iris_lib::{ModelRegistry, Stage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Iris CLI
#[derive(Parser)]
#[command(name = "iris")]
#[command(author, version, about = "CLI for the Iris classifier service", long_about = None)]
pub struct Cli {
    /// Serving API URL (can also be set via IRIS_API_URL env var)
    #[arg(long, env = "IRIS_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train all models, compare them and register the best one
    Train {
        /// Model registry directory
        #[arg(long, env = "REGISTRY_DIR", default_value = "mlruns/registry")]
        registry_dir: PathBuf,

        /// Directory for run artifacts and the comparison summary
        #[arg(long, default_value = "artifacts")]
        artifacts_dir: PathBuf,

        /// Directory for the train/test CSV split
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Skip writing the train/test CSV split
        #[arg(long)]
        no_data: bool,

        /// Copy the winning artifact to this path (e.g. artifacts/model.json)
        #[arg(long)]
        export: Option<PathBuf>,

        /// Do not register the winning model
        #[arg(long)]
        no_register: bool,

        /// Fraction of rows held out for evaluation
        #[arg(long, default_value_t = DEFAULT_TEST_SIZE)]
        test_size: f64,

        /// Random seed for the split and seeded models
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Manage the model registry
    Registry {
        /// Model registry directory
        #[arg(long, env = "REGISTRY_DIR", default_value = "mlruns/registry")]
        registry_dir: PathBuf,

        #[command(subcommand)]
        command: RegistryCommands,
    },

    /// Predict the class of one flower
    Predict {
        /// Sepal length, sepal width, petal length, petal width (cm)
        #[arg(required = true, allow_negative_numbers = true)]
        features: Vec<f64>,
    },

    /// Predict the classes of several flowers
    PredictBatch {
        /// Comma-separated feature row, repeatable (e.g. --row 5.1,3.5,1.4,0.2)
        #[arg(long = "row", required = true)]
        rows: Vec<String>,
    },

    /// Show recently logged predictions
    Logs {
        /// Maximum number of records
        #[arg(long, short, default_value_t = 100)]
        limit: usize,
    },

    /// Show the served model
    Info,

    /// Check that the API has a model loaded
    Health,
}

#[derive(Subcommand)]
pub enum RegistryCommands {
    /// List registered models
    List,

    /// List versions of a model
    Versions {
        /// Registered model name
        name: String,
    },

    /// Move a model version to a stage
    Promote {
        /// Registered model name
        name: String,

        /// Version number
        version: u32,

        /// Target stage (None, Staging, Production, Archived)
        #[arg(long, default_value = "Production")]
        stage: Stage,

        /// Archive versions currently in the target stage
        #[arg(long)]
        archive_existing: bool,
    },

    /// Delete a model version, or the whole model
    Delete {
        /// Registered model name
        name: String,

        /// Delete only this version
        #[arg(long)]
        version: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Plain, quiet logging so table output stays readable
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format;

    match cli.command {
        Commands::Train {
            registry_dir,
            artifacts_dir,
            data_dir,
            no_data,
            export,
            no_register,
            test_size,
            seed,
        } => {
            let options = train::TrainOptions {
                registry_dir,
                artifacts_dir,
                data_dir: (!no_data).then_some(data_dir),
                export,
                register: !no_register,
                test_size,
                seed,
            };
            train::run_training(options, format).await?;
        }
        Commands::Registry {
            registry_dir,
            command,
        } => {
            let model_registry = ModelRegistry::open(registry_dir);
            match command {
                RegistryCommands::List => registry::list_models(&model_registry, format)?,
                RegistryCommands::Versions { name } => {
                    registry::list_versions(&model_registry, &name, format)?
                }
                RegistryCommands::Promote {
                    name,
                    version,
                    stage,
                    archive_existing,
                } => registry::promote(
                    &model_registry,
                    &name,
                    version,
                    stage,
                    archive_existing,
                    format,
                )?,
                RegistryCommands::Delete { name, version } => {
                    registry::delete(&model_registry, &name, version)?
                }
            }
        }
        Commands::Predict { features } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            serving::predict(&client, features, format).await?;
        }
        Commands::PredictBatch { rows } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            serving::predict_batch(&client, &rows, format).await?;
        }
        Commands::Logs { limit } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            serving::logs(&client, limit, format).await?;
        }
        Commands::Info => {
            let client = client::ApiClient::new(&cli.api_url)?;
            serving::info(&client, format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            serving::health(&client, format).await?;
        }
    }

    Ok(())
}
