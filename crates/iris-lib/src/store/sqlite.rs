//! Embedded SQLite prediction log
//!
//! A connection is opened per operation on the blocking pool and closed when
//! the operation finishes, so the store holds no connection state.

use super::{PredictionStore, StoreBackend, StoreError};
use crate::models::PredictionRecord;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id TEXT UNIQUE NOT NULL,
        model_name TEXT NOT NULL,
        model_version TEXT NOT NULL,
        features TEXT NOT NULL,
        prediction INTEGER NOT NULL,
        probability REAL NOT NULL,
        latency_ms REAL NOT NULL,
        timestamp TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_predictions_request_id ON predictions(request_id);
    CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions(timestamp);
";

/// Prediction log in a local SQLite file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against a fresh connection on the blocking pool
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&path)?;
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Connection::open(path)?)
}

/// Fixed-width RFC 3339 so lexical order matches chronological order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed(format!("timestamp '{}': {}", value, e)))
}

/// Raw column values, converted outside the rusqlite row closure
struct RawRow {
    id: i64,
    request_id: String,
    model_name: String,
    model_version: String,
    features: String,
    prediction: i64,
    probability: f64,
    latency_ms: f64,
    timestamp: String,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_id: row.get(1)?,
            model_name: row.get(2)?,
            model_version: row.get(3)?,
            features: row.get(4)?,
            prediction: row.get(5)?,
            probability: row.get(6)?,
            latency_ms: row.get(7)?,
            timestamp: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<PredictionRecord, StoreError> {
        let features: Vec<f64> = serde_json::from_str(&self.features)
            .map_err(|e| StoreError::Malformed(format!("features: {}", e)))?;

        Ok(PredictionRecord {
            id: Some(self.id),
            request_id: self.request_id,
            model_name: self.model_name,
            model_version: self.model_version,
            features,
            prediction: self.prediction,
            probability: self.probability,
            latency_ms: self.latency_ms,
            timestamp: parse_timestamp(&self.timestamp)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[async_trait]
impl PredictionStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn try_initialize(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn try_append(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let features = serde_json::to_string(&record.features)
            .map_err(|e| StoreError::Malformed(format!("features: {}", e)))?;

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO predictions
                 (request_id, model_name, model_version, features, prediction,
                  probability, latency_ms, timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.request_id,
                    record.model_name,
                    record.model_version,
                    features,
                    record.prediction,
                    record.probability,
                    record.latency_ms,
                    format_timestamp(&record.timestamp),
                    format_timestamp(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn try_recent(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, request_id, model_name, model_version, features, prediction,
                        probability, latency_ms, timestamp, created_at
                 FROM predictions
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(params![limit], RawRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter().map(RawRow::into_record).collect()
        })
        .await
    }
}
