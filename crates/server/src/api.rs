//! HTTP API for predictions, model info, prediction logs and Prometheus metrics

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        MatchedPath, Query, Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use iris_lib::predictor::{validate_batch, validate_features};
use iris_lib::store::DEFAULT_RECENT_LIMIT;
use iris_lib::{
    ModelHandle, PredictionRecord, PredictionStore, ProcessSampler, ServingError, ServingMetrics,
    StructuredLogger,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    pub model: Arc<ModelHandle>,
    pub store: Arc<dyn PredictionStore>,
    pub metrics: ServingMetrics,
    pub logger: StructuredLogger,
    pub sampler: ProcessSampler,
    pub environment: String,
    pub canary_percentage: u8,
}

impl AppState {
    pub fn new(
        model: Arc<ModelHandle>,
        store: Arc<dyn PredictionStore>,
        metrics: ServingMetrics,
        logger: StructuredLogger,
        environment: impl Into<String>,
        canary_percentage: u8,
    ) -> Self {
        Self {
            model,
            store,
            metrics,
            logger,
            sampler: ProcessSampler::new(),
            environment: environment.into(),
            canary_percentage,
        }
    }

    /// Append a record off the request path. Failures are counted and
    /// logged but never reach the caller.
    fn spawn_log(&self, record: PredictionRecord) {
        let store = Arc::clone(&self.store);
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();

        tokio::spawn(async move {
            if !store.append(&record).await {
                metrics.inc_log_failures();
                logger.log_append_failure(&record.request_id);
            }
        });
    }

    fn info(&self) -> InfoResponse {
        InfoResponse {
            model_name: self.model.name().to_string(),
            version: self.model.version().to_string(),
            environment: self.environment.clone(),
            canary_percentage: self.canary_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictBatchRequest {
    pub features: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: usize,
    pub probability: f64,
    pub latency_ms: f64,
    pub model: String,
    pub version: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictBatchResponse {
    pub predictions: Vec<usize>,
    pub probabilities: Vec<f64>,
    pub latency_ms: f64,
    pub model: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub model_name: String,
    pub version: String,
    pub environment: String,
    pub canary_percentage: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub count: usize,
    pub logs: Vec<PredictionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Error type label attached to error responses for the instrumentation layer
#[derive(Debug, Clone, Copy)]
pub struct ErrorKind(pub &'static str);

/// Error returned by handlers, rendered as `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl ApiError {
    fn invalid_input(detail: String) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            kind: "InvalidInput",
            detail,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServingError> for ApiError {
    fn from(e: ServingError) -> Self {
        let status = match &e {
            ServingError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServingError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServingError::StorageUnavailable(_) | ServingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: e.kind(),
            detail: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(ErrorBody { detail: self.detail })).into_response();
        response.extensions_mut().insert(ErrorKind(self.kind));
        response
    }
}

/// Turn a handler panic into a 500 with the usual error body
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "Unexpected error during inference".to_string()
    };
    error!(error = %detail, "Request handler panicked");

    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        kind: "InternalError",
        detail,
    }
    .into_response()
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Iris Classifier API",
        "docs": "/docs",
        "health": "/healthz",
    }))
}

/// Returns 200 once a model is loaded, 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    if !state.model.is_loaded() {
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind: ServingError::ModelUnavailable.kind(),
            detail: "Model not loaded yet".to_string(),
        });
    }

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        environment: state.environment.clone(),
        model: state.model.name().to_string(),
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload?;
    let features = validate_features(&request.features)?;
    let inference = state.model.predict(&features)?;

    let request_id = Uuid::new_v4().to_string();
    let model = state.model.name();
    let version = state.model.version();
    let latency_ms = inference.latency_ms();

    state
        .metrics
        .record_prediction(model, inference.class, inference.latency.as_secs_f64());
    state.logger.log_prediction(
        &request_id,
        model,
        version,
        inference.class,
        inference.probability,
        latency_ms,
    );
    if state.model.is_low_confidence(&inference) {
        state
            .logger
            .log_low_confidence(&request_id, inference.class, inference.probability);
    }

    state.spawn_log(PredictionRecord::new(
        request_id.clone(),
        model,
        version,
        features.to_vec(),
        inference.class,
        inference.probability,
        latency_ms,
    ));

    Ok(Json(PredictResponse {
        prediction: inference.class,
        probability: inference.probability,
        latency_ms,
        model: model.to_string(),
        version: version.to_string(),
        request_id,
    }))
}

async fn predict_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictBatchRequest>, JsonRejection>,
) -> Result<Json<PredictBatchResponse>, ApiError> {
    let Json(request) = payload?;
    let rows = validate_batch(&request.features)?;
    let batch = state.model.predict_batch(&rows)?;

    let model = state.model.name();
    state
        .metrics
        .record_batch(model, rows.len(), batch.latency.as_secs_f64());
    for &class in &batch.classes {
        state.metrics.inc_prediction_class(model, class);
    }
    state
        .logger
        .log_batch_prediction(model, rows.len(), batch.latency_ms());

    Ok(Json(PredictBatchResponse {
        latency_ms: batch.latency_ms(),
        predictions: batch.classes,
        probabilities: batch.probabilities,
        model: model.to_string(),
        version: state.model.version().to_string(),
    }))
}

/// Model info; served on both `/info` and `/metrics`
async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(state.info())
}

/// Prometheus text exposition. Process gauges are refreshed first.
async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    match state.sampler.sample().await {
        Ok(sample) => state.metrics.set_process_usage(&sample),
        Err(e) => debug!(error = %e, "Process usage unavailable"),
    }

    let body = state.metrics.encode_text().map_err(ServingError::from)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let logs = state.store.recent(limit).await;

    Ok(Json(LogsResponse {
        count: logs.len(),
        logs,
    }))
}

/// Request count, latency and error metrics around every instrumented route
async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let status = response.status();
    state.metrics.record_request(
        &method,
        &endpoint,
        status.as_u16(),
        start.elapsed().as_secs_f64(),
    );

    if status.is_client_error() || status.is_server_error() {
        let kind = match response.extensions().get::<ErrorKind>() {
            Some(ErrorKind(kind)) => *kind,
            None if status.is_server_error() => "InternalError",
            None => "HttpError",
        };
        state.metrics.record_error(kind, &endpoint);
    }

    response
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/predict", post(predict))
        .route("/predict-batch", post(predict_batch))
        .route("/metrics", get(info))
        .route("/info", get(info))
        .route("/logs", get(logs))
        .route_layer(CatchPanicLayer::custom(panic_response))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_requests,
        ))
        // Scrapes are not counted as API traffic
        .route("/metrics-prometheus", get(metrics_prometheus))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server and run until `shutdown` completes
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
