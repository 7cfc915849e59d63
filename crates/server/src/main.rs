//! Iris serving API
//!
//! Loads the configured model once at startup and serves predictions,
//! prediction logs and Prometheus metrics over HTTP.

use anyhow::{Context, Result};
use iris_lib::{create_store, ServingMetrics, StructuredLogger};
use iris_server::{api, config::AppConfig, model_loader, system_metrics};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting iris-server");

    let config = AppConfig::load()?;
    info!(
        environment = %config.environment,
        model_name = %config.model_name,
        "Server configured"
    );

    let logger = StructuredLogger::new(&config.environment);
    let metrics = ServingMetrics::new().context("Failed to register metrics")?;

    let store_config = config.store_config();
    let store = create_store(&store_config).context("Failed to create prediction log store")?;
    if !store.initialize().await {
        warn!(
            backend = %store_config.backend,
            "Prediction log unavailable, predictions will not be persisted"
        );
    }

    let (model, source) = model_loader::load_model(&config, &logger);
    metrics.set_model_loaded(model.name(), model.is_loaded());
    info!(source = source.as_str(), version = %model.version(), "Model resolved");

    let state = Arc::new(api::AppState::new(
        Arc::new(model),
        store,
        metrics,
        logger.clone(),
        config.environment.clone(),
        config.canary(),
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let sampler_handle = tokio::spawn(system_metrics::run(
        Arc::clone(&state),
        config.system_metrics_interval(),
        shutdown_tx.subscribe(),
    ));

    logger.log_startup(SERVER_VERSION, state.model.version(), config.api_port);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    api::serve(config.api_port, Arc::clone(&state), shutdown).await?;

    logger.log_shutdown("SIGINT received", &state.model.stats());
    let _ = shutdown_tx.send(());
    let _ = sampler_handle.await;
    info!("Shutdown complete");

    Ok(())
}
