//! Startup model loading
//!
//! Resolution order: the artifact file at `MODEL_PATH` (reported as version
//! 1.0.0), then the latest Production version of `MODEL_NAME` in the
//! registry, otherwise the server stays unloaded for its whole lifetime.

use crate::config::AppConfig;
use iris_lib::{ModelHandle, ModelRegistry, Stage, StructuredLogger, TrainedModel};
use std::sync::Arc;
use tracing::{debug, warn};

/// Version reported for a model loaded from an artifact file
pub const ARTIFACT_VERSION: &str = "1.0.0";

/// Where the served model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Artifact,
    Registry,
    None,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::Artifact => "artifact",
            ModelSource::Registry => "registry",
            ModelSource::None => "none",
        }
    }
}

/// Resolve the model to serve. Never fails; load errors are logged and
/// the next source is tried.
pub fn load_model(config: &AppConfig, logger: &StructuredLogger) -> (ModelHandle, ModelSource) {
    let name = config.model_name.as_str();

    if config.model_path.exists() {
        match TrainedModel::load(&config.model_path) {
            Ok(model) => {
                logger.log_model_load(name, ARTIFACT_VERSION, ModelSource::Artifact.as_str(), true);
                return (
                    ModelHandle::loaded(name, ARTIFACT_VERSION, Arc::new(model)),
                    ModelSource::Artifact,
                );
            }
            Err(e) => {
                warn!(
                    path = %config.model_path.display(),
                    error = %e,
                    "Failed to load model artifact"
                );
            }
        }
    } else {
        debug!(path = %config.model_path.display(), "No model artifact file");
    }

    let registry = ModelRegistry::open(&config.registry_dir);
    match registry.latest_version(name, Some(Stage::Production)) {
        Ok(Some(version)) => match registry.load_artifact(name, version.version) {
            Ok(model) => {
                let version = version.version.to_string();
                logger.log_model_load(name, &version, ModelSource::Registry.as_str(), true);
                return (
                    ModelHandle::loaded(name, version, Arc::new(model)),
                    ModelSource::Registry,
                );
            }
            Err(e) => {
                warn!(
                    model_name = %name,
                    version = version.version,
                    error = %e,
                    "Failed to load registered model"
                );
            }
        },
        Ok(None) => debug!(model_name = %name, "No Production version registered"),
        Err(e) => debug!(model_name = %name, error = %e, "Model not available from registry"),
    }

    logger.log_model_load(
        name,
        iris_lib::predictor::UNLOADED_VERSION,
        ModelSource::None.as_str(),
        false,
    );
    (ModelHandle::unloaded(name), ModelSource::None)
}
