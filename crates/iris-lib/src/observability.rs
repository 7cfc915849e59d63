//! Observability infrastructure for the serving API
//!
//! Provides:
//! - Prometheus metrics (request counts/latency, prediction class distribution,
//!   batch size, errors, model-loaded gauge, process CPU/memory)
//! - Structured JSON logging with tracing
//! - A /proc sampler feeding the process gauges

use crate::predictor::InferenceStats;
use anyhow::{Context, Result};
use prometheus::{
    register_gauge_with_registry, register_histogram_vec_with_registry,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, Encoder, Gauge,
    Histogram, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::fs;
use tracing::{info, warn};

/// Buckets for HTTP request latency (in seconds)
const REQUEST_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0,
];

/// Buckets for model inference latency (in seconds)
const PREDICTION_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5];

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0];

/// Inner metrics structure that holds the actual Prometheus metrics
struct ServingMetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    prediction_duration_seconds: HistogramVec,
    errors_total: IntCounterVec,
    batch_size: Histogram,
    model_loaded: IntGaugeVec,
    log_failures_total: IntCounter,
    cpu_usage_percent: Gauge,
    memory_usage_bytes: Gauge,
    memory_usage_percent: Gauge,
}

impl ServingMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            requests_total: register_int_counter_vec_with_registry!(
                "iris_api_requests_total",
                "Total number of API requests",
                &["method", "endpoint", "status"],
                registry
            )?,

            request_duration_seconds: register_histogram_vec_with_registry!(
                "iris_api_request_duration_seconds",
                "API request latency in seconds",
                &["method", "endpoint"],
                REQUEST_LATENCY_BUCKETS.to_vec(),
                registry
            )?,

            predictions_total: register_int_counter_vec_with_registry!(
                "iris_predictions_total",
                "Total number of predictions made",
                &["model", "prediction_class"],
                registry
            )?,

            prediction_duration_seconds: register_histogram_vec_with_registry!(
                "iris_prediction_duration_seconds",
                "Model inference latency in seconds",
                &["model"],
                PREDICTION_LATENCY_BUCKETS.to_vec(),
                registry
            )?,

            errors_total: register_int_counter_vec_with_registry!(
                "iris_api_errors_total",
                "Total number of API errors",
                &["error_type", "endpoint"],
                registry
            )?,

            batch_size: register_histogram_with_registry!(
                "iris_batch_size",
                "Number of rows per batch prediction request",
                BATCH_SIZE_BUCKETS.to_vec(),
                registry
            )?,

            model_loaded: register_int_gauge_vec_with_registry!(
                "iris_model_loaded",
                "Whether the model is loaded (1) or not (0)",
                &["model_name"],
                registry
            )?,

            log_failures_total: register_int_counter_with_registry!(
                "iris_prediction_log_failures_total",
                "Predictions whose log append failed",
                registry
            )?,

            cpu_usage_percent: register_gauge_with_registry!(
                "iris_cpu_usage_percent",
                "Process CPU usage percentage since the last sample",
                registry
            )?,

            memory_usage_bytes: register_gauge_with_registry!(
                "iris_memory_usage_bytes",
                "Process resident memory in bytes",
                registry
            )?,

            memory_usage_percent: register_gauge_with_registry!(
                "iris_memory_usage_percent",
                "Process resident memory as a percentage of system memory",
                registry
            )?,

            registry,
        })
    }
}

/// Serving metrics for Prometheus exposition
///
/// Each handle owns its registry, so independent instances (one per test,
/// one per process) never collide. Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServingMetrics {
    inner: Arc<ServingMetricsInner>,
}

impl ServingMetrics {
    /// Create a new metrics handle with a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            inner: Arc::new(ServingMetricsInner::new()?),
        })
    }

    /// Record one completed HTTP request
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        self.inner
            .requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.inner
            .request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration_secs);
    }

    /// Record one predicted row
    pub fn record_prediction(&self, model: &str, class: usize, duration_secs: f64) {
        self.inner
            .predictions_total
            .with_label_values(&[model, &class.to_string()])
            .inc();
        self.inner
            .prediction_duration_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    /// Increment the prediction counter without a latency observation
    pub fn inc_prediction_class(&self, model: &str, class: usize) {
        self.inner
            .predictions_total
            .with_label_values(&[model, &class.to_string()])
            .inc();
    }

    /// Record a batch inference: one size observation, one latency observation
    pub fn record_batch(&self, model: &str, size: usize, duration_secs: f64) {
        self.inner.batch_size.observe(size as f64);
        self.inner
            .prediction_duration_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn record_error(&self, error_type: &str, endpoint: &str) {
        self.inner
            .errors_total
            .with_label_values(&[error_type, endpoint])
            .inc();
    }

    /// Set the model-loaded gauge
    pub fn set_model_loaded(&self, model_name: &str, loaded: bool) {
        self.inner
            .model_loaded
            .with_label_values(&[model_name])
            .set(i64::from(loaded));
    }

    pub fn inc_log_failures(&self) {
        self.inner.log_failures_total.inc();
    }

    /// Update the process resource gauges
    pub fn set_process_usage(&self, sample: &ProcessSample) {
        self.inner.cpu_usage_percent.set(sample.cpu_percent);
        self.inner.memory_usage_bytes.set(sample.memory_bytes as f64);
        self.inner.memory_usage_percent.set(sample.memory_percent);
    }

    /// Current value of the log failure counter
    pub fn log_failures(&self) -> u64 {
        self.inner.log_failures_total.get()
    }

    /// Current value of a prediction class counter
    pub fn predictions_for(&self, model: &str, class: usize) -> u64 {
        self.inner
            .predictions_total
            .with_label_values(&[model, &class.to_string()])
            .get()
    }

    /// Encode every metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .context("Failed to encode metrics")?;

        String::from_utf8(buffer).context("Metrics exposition is not valid UTF-8")
    }
}

/// One reading of the process resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSample {
    /// CPU time consumed since the previous sample, as a percentage of wall time
    pub cpu_percent: f64,
    /// Resident set size
    pub memory_bytes: u64,
    /// Resident set size relative to MemTotal
    pub memory_percent: f64,
}

/// Clock ticks per second used by /proc/<pid>/stat
const USER_HZ: f64 = 100.0;

/// Samples CPU and memory usage of the current process from procfs
pub struct ProcessSampler {
    proc_path: PathBuf,
    last_cpu: Mutex<Option<(f64, Instant)>>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create sampler with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            last_cpu: Mutex::new(None),
        }
    }

    /// Take one sample. The first call reports 0% CPU.
    pub async fn sample(&self) -> Result<ProcessSample> {
        let stat = fs::read_to_string(self.proc_path.join("self/stat"))
            .await
            .context("Failed to read process stat")?;
        let status = fs::read_to_string(self.proc_path.join("self/status"))
            .await
            .context("Failed to read process status")?;
        let meminfo = fs::read_to_string(self.proc_path.join("meminfo"))
            .await
            .context("Failed to read meminfo")?;

        let cpu_secs = Self::parse_cpu_ticks(&stat)
            .map(|ticks| ticks as f64 / USER_HZ)
            .context("Malformed process stat")?;
        let memory_bytes = Self::parse_kb_field(&status, "VmRSS:").unwrap_or(0);
        let total_bytes = Self::parse_kb_field(&meminfo, "MemTotal:").unwrap_or(0);

        let now = Instant::now();
        let cpu_percent = {
            let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
            let percent = match *last {
                Some((prev_secs, prev_at)) => {
                    let wall = now.duration_since(prev_at).as_secs_f64();
                    if wall > 0.0 {
                        ((cpu_secs - prev_secs).max(0.0) / wall) * 100.0
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
            *last = Some((cpu_secs, now));
            percent
        };

        let memory_percent = if total_bytes > 0 {
            memory_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };

        Ok(ProcessSample {
            cpu_percent,
            memory_bytes,
            memory_percent,
        })
    }

    /// Parse utime + stime (in clock ticks) from /proc/<pid>/stat
    ///
    /// The command name may contain spaces, so fields are counted from the
    /// closing parenthesis.
    pub fn parse_cpu_ticks(content: &str) -> Option<u64> {
        let rest = &content[content.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // fields[0] is state (field 3); utime and stime are fields 14 and 15
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        Some(utime + stime)
    }

    /// Parse a `Key:   1234 kB` line into bytes
    pub fn parse_kb_field(content: &str, key: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let value = line.strip_prefix(key)?;
            let kb: u64 = value.split_whitespace().next()?.parse().ok()?;
            Some(kb * 1024)
        })
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured logger for serving events
///
/// Provides consistent JSON-formatted logging for predictions, model
/// loading and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    environment: String,
}

impl StructuredLogger {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    /// Log a served prediction
    pub fn log_prediction(
        &self,
        request_id: &str,
        model_name: &str,
        model_version: &str,
        prediction: usize,
        probability: f64,
        latency_ms: f64,
    ) {
        info!(
            event = "prediction_served",
            environment = %self.environment,
            request_id = %request_id,
            model_name = %model_name,
            model_version = %model_version,
            prediction = prediction,
            probability = probability,
            latency_ms = latency_ms,
            "Prediction served"
        );
    }

    /// Log a served batch prediction
    pub fn log_batch_prediction(&self, model_name: &str, rows: usize, latency_ms: f64) {
        info!(
            event = "batch_prediction_served",
            environment = %self.environment,
            model_name = %model_name,
            rows = rows,
            latency_ms = latency_ms,
            "Batch prediction served"
        );
    }

    /// Log a prediction whose top-class probability is below the confidence threshold
    pub fn log_low_confidence(&self, request_id: &str, prediction: usize, probability: f64) {
        warn!(
            event = "low_confidence_prediction",
            environment = %self.environment,
            request_id = %request_id,
            prediction = prediction,
            probability = probability,
            "Low confidence prediction"
        );
    }

    /// Log a failed prediction log append
    pub fn log_append_failure(&self, request_id: &str) {
        warn!(
            event = "prediction_log_failed",
            environment = %self.environment,
            request_id = %request_id,
            "Prediction was served but could not be logged"
        );
    }

    /// Log the outcome of startup model loading
    pub fn log_model_load(&self, model_name: &str, version: &str, source: &str, loaded: bool) {
        if loaded {
            info!(
                event = "model_loaded",
                environment = %self.environment,
                model_name = %model_name,
                model_version = %version,
                source = %source,
                "Model loaded"
            );
        } else {
            warn!(
                event = "model_unavailable",
                environment = %self.environment,
                model_name = %model_name,
                "No model could be loaded, serving in unloaded state"
            );
        }
    }

    /// Log server startup
    pub fn log_startup(&self, version: &str, model_version: &str, port: u16) {
        info!(
            event = "server_started",
            environment = %self.environment,
            server_version = %version,
            model_version = %model_version,
            port = port,
            "Iris serving API started"
        );
    }

    /// Log server shutdown
    pub fn log_shutdown(&self, reason: &str, stats: &InferenceStats) {
        info!(
            event = "server_shutdown",
            environment = %self.environment,
            reason = %reason,
            total_inferences = stats.total_inferences,
            slow_inferences = stats.slow_inferences,
            "Iris serving API shutting down"
        );
    }
}
