//! Iris serving API
//!
//! HTTP façade over the shared model handle, prediction log and metrics
//! recorder from `iris-lib`.

pub mod api;
pub mod config;
pub mod model_loader;
pub mod system_metrics;
