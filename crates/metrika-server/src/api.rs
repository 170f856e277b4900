use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrika_common::error::MetricError;
use metrika_common::types::{format_gauge, MetricKind, MetricUpdate, Metrics, Snapshot};
use metrika_storage::error::StorageError;
use metrika_storage::Storage;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Failure of a request, rendered as a status code and a short plain-text
/// body.
#[derive(Debug)]
pub enum ApiError {
    Metric(MetricError),
    NotFound,
    BodyMissing,
    BadBody(String),
    StorageMissing,
    Storage(StorageError),
}

impl From<MetricError> for ApiError {
    fn from(err: MetricError) -> Self {
        ApiError::Metric(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Metric(err) if err.is_not_found() => (StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Metric(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "metric not found".to_string()),
            ApiError::BodyMissing => (StatusCode::BAD_REQUEST, "body not found".to_string()),
            ApiError::BadBody(reason) => (StatusCode::BAD_REQUEST, format!("invalid body: {reason}")),
            ApiError::StorageMissing => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage not initialized".to_string(),
            ),
            ApiError::Storage(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, message).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_metrics))
        .route("/live", get(live))
        .route("/ping", get(ping))
        .route("/update", post(update_json))
        .route("/update/", post(update_json))
        .route("/update/:kind", post(update_without_name))
        .route("/update/:kind/", post(update_without_name))
        .route("/update/:kind/:name", post(update_without_value))
        .route("/update/:kind/:name/", post(update_without_value))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/updates", post(update_batch))
        .route("/updates/", post(update_batch))
        .route("/value", post(value_json))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
}

fn storage(state: &AppState) -> ApiResult<&Arc<dyn Storage>> {
    state.storage.as_ref().ok_or(ApiError::StorageMissing)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BodyMissing);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadBody(e.to_string()))
}

/// Applies a validated update and returns the stored record: the running
/// total for counters, the new value for gauges.
async fn apply(storage: &dyn Storage, update: MetricUpdate) -> Result<Metrics, StorageError> {
    match update {
        MetricUpdate::Counter { name, delta } => {
            let total = storage.update_counter(&name, delta).await?;
            Ok(Metrics::counter(name, total))
        }
        MetricUpdate::Gauge { name, value } => {
            let stored = storage.update_gauge(&name, value).await?;
            Ok(Metrics::gauge(name, stored))
        }
    }
}

async fn live() -> &'static str {
    "Live"
}

async fn ping(State(state): State<AppState>) -> ApiResult<&'static str> {
    storage(&state)?.ping().await?;
    Ok("Pong")
}

async fn list_metrics(State(state): State<AppState>) -> ApiResult<Json<Snapshot>> {
    let snapshot = storage(&state)?.snapshot().await?;
    Ok(Json(snapshot))
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let update = MetricUpdate::parse(&kind, &name, &value)?;
    apply(storage(&state)?.as_ref(), update).await?;
    Ok(StatusCode::OK)
}

async fn update_without_value(Path((kind, name)): Path<(String, String)>) -> ApiError {
    match MetricUpdate::parse(&kind, &name, "") {
        Err(err) => err.into(),
        Ok(_) => ApiError::Metric(MetricError::MissingValue),
    }
}

async fn update_without_name(Path(kind): Path<String>) -> ApiError {
    match MetricUpdate::parse(&kind, "", "") {
        Err(err) => err.into(),
        Ok(_) => ApiError::Metric(MetricError::MissingName),
    }
}

async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metrics>> {
    let record: Metrics = parse_body(&body)?;
    let update = record.to_update()?;
    let stored = apply(storage(&state)?.as_ref(), update).await?;
    Ok(Json(stored))
}

/// Applies each record on its own. Invalid records and storage failures
/// are logged and skipped; the response echoes the submitted array.
async fn update_batch(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> ApiResult<Json<Vec<Metrics>>> {
    let records: Vec<Metrics> = parse_body(&body)?;
    let storage = storage(&state)?;

    let mut applied = 0usize;
    for (index, record) in records.iter().enumerate() {
        let update = match record.to_update() {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id.0, index, id = %record.id, error = %e, "Skipping invalid batch record");
                continue;
            }
        };
        match apply(storage.as_ref(), update).await {
            Ok(_) => applied += 1,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id.0, index, id = %record.id, error = %e, "Batch record not stored");
            }
        }
    }
    tracing::debug!(trace_id = %trace_id.0, received = records.len(), applied, "Batch applied");

    Ok(Json(records))
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse().map_err(|_| ApiError::NotFound)?;
    let storage = storage(&state)?;
    match kind {
        MetricKind::Counter => storage
            .counter(&name)
            .await?
            .map(|total| total.to_string())
            .ok_or(ApiError::NotFound),
        MetricKind::Gauge => storage
            .gauge(&name)
            .await?
            .map(format_gauge)
            .ok_or(ApiError::NotFound),
    }
}

async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metrics>> {
    let query: Metrics = parse_body(&body)?;
    let kind = query.kind().map_err(|_| ApiError::NotFound)?;
    if query.id.is_empty() {
        return Err(ApiError::NotFound);
    }
    let storage = storage(&state)?;
    let record = match kind {
        MetricKind::Counter => storage
            .counter(&query.id)
            .await?
            .map(|total| Metrics::counter(query.id.as_str(), total)),
        MetricKind::Gauge => storage
            .gauge(&query.id)
            .await?
            .map(|value| Metrics::gauge(query.id.as_str(), value)),
    };
    record.map(Json).ok_or(ApiError::NotFound)
}
