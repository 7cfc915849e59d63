//! Core library for the Iris model-serving stack
//!
//! This crate provides the core functionality for:
//! - Feature validation and inference over a loaded classifier
//! - Prometheus metrics, structured logging and process sampling
//! - The append-only prediction log (SQLite or PostgreSQL)
//! - Training, evaluation and the file-backed model registry

pub mod error;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod registry;
pub mod store;
pub mod training;

pub use error::ServingError;
pub use models::*;
pub use observability::{ProcessSample, ProcessSampler, ServingMetrics, StructuredLogger};
pub use predictor::{Classifier, ModelHandle};
pub use registry::{ModelRegistry, RegistryError};
pub use store::{create_store, PredictionStore, StoreBackend, StoreConfig, StoreError};
pub use training::{ModelKind, TrainedModel, TrainingError};
