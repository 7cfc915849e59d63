//! Error taxonomy for the serving path

use thiserror::Error;

/// Errors surfaced by the serving façade
#[derive(Debug, Error)]
pub enum ServingError {
    /// Client-caused shape or type mismatch
    #[error("{0}")]
    InvalidInput(String),

    /// No model has been loaded into this process
    #[error("Model not loaded")]
    ModelUnavailable,

    /// Log or metrics backend unreachable; never returned to prediction callers
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Unexpected failure during inference
    #[error("{0}")]
    Internal(String),
}

impl ServingError {
    /// Short, stable name used as the `error_type` metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ServingError::InvalidInput(_) => "InvalidInput",
            ServingError::ModelUnavailable => "ModelUnavailable",
            ServingError::StorageUnavailable(_) => "StorageUnavailable",
            ServingError::Internal(_) => "InternalError",
        }
    }
}

impl From<anyhow::Error> for ServingError {
    fn from(e: anyhow::Error) -> Self {
        ServingError::Internal(e.to_string())
    }
}
