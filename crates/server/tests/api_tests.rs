//! Integration tests for the serving API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use iris_lib::store::SqliteStore;
use iris_lib::training::{fetch_data, DEFAULT_SEED, DEFAULT_TEST_SIZE};
use iris_lib::{
    Classifier, ModelHandle, ModelKind, PredictionStore, ServingMetrics, StructuredLogger,
    TrainedModel,
};
use ndarray::Array2;
use iris_server::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const SETOSA: [f64; 4] = [5.1, 3.5, 1.4, 0.2];
const VERSICOLOR: [f64; 4] = [6.4, 3.2, 4.5, 1.5];
const VIRGINICA: [f64; 4] = [7.7, 3.0, 6.1, 2.3];

fn forest() -> Arc<TrainedModel> {
    static MODEL: OnceLock<Arc<TrainedModel>> = OnceLock::new();
    MODEL
        .get_or_init(|| {
            let split = fetch_data(DEFAULT_TEST_SIZE, DEFAULT_SEED).unwrap();
            Arc::new(
                TrainedModel::train(ModelKind::RandomForest, &split.x_train, &split.y_train)
                    .unwrap(),
            )
        })
        .clone()
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

async fn setup(loaded: bool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn PredictionStore> = Arc::new(SqliteStore::new(dir.path().join("p.db")));
    assert!(store.initialize().await, "prediction log should initialize");
    setup_with_store(model(loaded), store, dir)
}

fn model(loaded: bool) -> ModelHandle {
    if loaded {
        ModelHandle::loaded("iris-logistic-regression", "1.0.0", forest())
    } else {
        ModelHandle::unloaded("iris-logistic-regression")
    }
}

fn setup_with_store(model: ModelHandle, store: Arc<dyn PredictionStore>, dir: TempDir) -> TestApp {
    let state = Arc::new(AppState::new(
        Arc::new(model),
        store,
        ServingMetrics::new().unwrap(),
        StructuredLogger::new("test"),
        "test",
        25,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &TestApp, uri: &str, payload: Value) -> (StatusCode, Value) {
    let (status, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn wait_for_logs(app: &TestApp, expected: u64) -> Value {
    for _ in 0..50 {
        let (_, logs) = get_json(app, "/logs").await;
        if logs["count"].as_u64() == Some(expected) {
            return logs;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("prediction log never reached {} records", expected);
}

#[tokio::test]
async fn test_root_lists_entry_points() {
    let app = setup(false).await;
    let (status, body) = get_json(&app, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Iris Classifier API");
    assert_eq!(body["health"], "/healthz");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unloaded() {
    let app = setup(false).await;
    let (status, body) = get_json(&app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Model not loaded yet");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_loaded() {
    let app = setup(true).await;
    let (status, body) = get_json(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["model"], "iris-logistic-regression");
}

#[tokio::test]
async fn test_predict_setosa() {
    let app = setup(true).await;
    let (status, body) = post_json(&app, "/predict", json!({ "features": SETOSA })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);
    assert!(body["probability"].as_f64().unwrap() >= 0.9);
    assert!(body["latency_ms"].as_f64().unwrap() >= 0.0);
    assert_eq!(body["model"], "iris-logistic-regression");
    assert_eq!(body["version"], "1.0.0");
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_predict_returns_503_when_unloaded() {
    let app = setup(false).await;
    let (status, body) = post_json(&app, "/predict", json!({ "features": SETOSA })).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Model not loaded");
}

#[tokio::test]
async fn test_wrong_length_is_422_regardless_of_model_state() {
    for loaded in [true, false] {
        let app = setup(loaded).await;
        let (status, body) =
            post_json(&app, "/predict", json!({ "features": [5.1, 3.5, 1.4] })).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("4 dimensions"));
    }
}

#[tokio::test]
async fn test_non_numeric_features_are_422() {
    let app = setup(true).await;
    let (status, body) = post_json(&app, "/predict", json!({ "features": "invalid" })).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_predict_batch_preserves_order() {
    let app = setup(true).await;
    let (status, body) = post_json(
        &app,
        "/predict-batch",
        json!({ "features": [SETOSA, VERSICOLOR, VIRGINICA] }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let predictions = body["predictions"].as_array().unwrap();
    let probabilities = body["probabilities"].as_array().unwrap();
    assert_eq!(predictions.len(), 3);
    assert_eq!(probabilities.len(), 3);
    assert_eq!(predictions[0], 0);
    assert_eq!(predictions[2], 2);
    for p in probabilities {
        let p = p.as_f64().unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
    assert!(body["latency_ms"].as_f64().unwrap() >= 0.0);
    assert_eq!(body["version"], "1.0.0");

    let text = app.state.metrics.encode_text().unwrap();
    assert!(text.contains("iris_batch_size_count 1"));
    assert_eq!(app.state.metrics.predictions_for("iris-logistic-regression", 0), 1);
}

#[tokio::test]
async fn test_predict_batch_rejects_bad_rows() {
    let app = setup(true).await;

    let (status, body) = post_json(
        &app,
        "/predict-batch",
        json!({ "features": [SETOSA, [1.0, 2.0]] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().starts_with("Row 1"));

    let (status, _) = post_json(&app, "/predict-batch", json!({ "features": [] })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_info_and_metrics_agree() {
    let app = setup(true).await;
    let (status, info) = get_json(&app, "/info").await;
    let (_, metrics) = get_json(&app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(info, metrics);
    assert_eq!(info["model_name"], "iris-logistic-regression");
    assert_eq!(info["version"], "1.0.0");
    assert_eq!(info["environment"], "test");
    assert_eq!(info["canary_percentage"], 25);
}

#[tokio::test]
async fn test_info_succeeds_when_unloaded() {
    let app = setup(false).await;
    let (status, info) = get_json(&app, "/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["version"], "0.0.0");
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let app = setup(true).await;
    post_json(&app, "/predict", json!({ "features": SETOSA })).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics-prometheus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("iris_predictions_total"));
    assert!(text.contains("iris_api_requests_total"));
    assert!(text.contains("endpoint=\"/predict\""));
    assert!(!text.contains("endpoint=\"/metrics-prometheus\""));
}

#[tokio::test]
async fn test_errors_are_counted_by_type() {
    let app = setup(false).await;
    post_json(&app, "/predict", json!({ "features": SETOSA })).await;
    post_json(&app, "/predict", json!({ "features": [1.0] })).await;

    let text = app.state.metrics.encode_text().unwrap();
    assert!(text.contains("error_type=\"ModelUnavailable\""));
    assert!(text.contains("error_type=\"InvalidInput\""));
    assert!(text.contains("status=\"503\""));
    assert!(text.contains("status=\"422\""));
}

#[tokio::test]
async fn test_prediction_is_logged() {
    let app = setup(true).await;
    let (_, prediction) = post_json(&app, "/predict", json!({ "features": SETOSA })).await;

    let logs = wait_for_logs(&app, 1).await;
    let record = &logs["logs"][0];
    assert_eq!(record["request_id"], prediction["request_id"]);
    assert_eq!(record["model_name"], "iris-logistic-regression");
    assert_eq!(record["model_version"], "1.0.0");
    assert_eq!(record["prediction"], 0);
    assert_eq!(record["features"], json!(SETOSA));
}

#[tokio::test]
async fn test_logs_newest_first_and_limit() {
    let app = setup(true).await;
    let mut request_ids = Vec::new();
    for features in [SETOSA, VERSICOLOR, VIRGINICA] {
        let (_, body) = post_json(&app, "/predict", json!({ "features": features })).await;
        request_ids.push(body["request_id"].clone());
        wait_for_logs(&app, request_ids.len() as u64).await;
    }

    let (status, logs) = get_json(&app, "/logs?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][0]["request_id"], request_ids[2]);
    assert_eq!(logs["logs"][1]["request_id"], request_ids[1]);
}

#[tokio::test]
async fn test_logs_rejects_invalid_limit() {
    let app = setup(true).await;
    let (status, body) = get_json(&app, "/logs?limit=lots").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_logging_failure_does_not_change_response() {
    let dir = TempDir::new().unwrap();
    // A regular file where the database directory should be
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let store: Arc<dyn PredictionStore> = Arc::new(SqliteStore::new(blocker.join("p.db")));
    let app = setup_with_store(model(true), store, dir);

    let (status, body) = post_json(&app, "/predict", json!({ "features": SETOSA })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);

    for _ in 0..50 {
        if app.state.metrics.log_failures() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(app.state.metrics.log_failures(), 1);

    let (status, logs) = get_json(&app, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["count"], 0);
}

/// Classifier that panics on every call
struct Exploding;

impl Classifier for Exploding {
    fn classes(&self) -> &[usize] {
        &[0, 1, 2]
    }

    fn predict_proba(&self, _rows: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        panic!("classifier exploded")
    }
}

#[tokio::test]
async fn test_classifier_panic_returns_500() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn PredictionStore> = Arc::new(SqliteStore::new(dir.path().join("p.db")));
    let model = ModelHandle::loaded("iris-logistic-regression", "1.0.0", Arc::new(Exploding));
    let app = setup_with_store(model, store, dir);

    let (status, body) = post_json(&app, "/predict", json!({ "features": SETOSA })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "classifier exploded");

    // The server keeps serving after the panic
    let (status, _) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let text = app.state.metrics.encode_text().unwrap();
    assert!(text.contains("error_type=\"InternalError\""));
    assert!(text.contains("status=\"500\""));
}

#[tokio::test]
async fn test_logging_recovers_after_database_removed() {
    let app = setup(true).await;
    post_json(&app, "/predict", json!({ "features": SETOSA })).await;
    wait_for_logs(&app, 1).await;

    std::fs::remove_file(app._dir.path().join("p.db")).unwrap();

    post_json(&app, "/predict", json!({ "features": VIRGINICA })).await;
    let logs = wait_for_logs(&app, 1).await;
    assert_eq!(logs["logs"][0]["prediction"], 2);
    assert_eq!(app.state.metrics.log_failures(), 0);
}
