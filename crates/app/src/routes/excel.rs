use axum::{
    extract::{Query, State},
    http::{header::HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use crate::{error::ApiError, state::AppState};

const DEFAULT_STREAM_DURATION: Duration = Duration::from_secs(300);
const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(200);
const MIN_STREAM_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    pub file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WordParams {
    pub word: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RowParams {
    pub sheet: Option<String>,
    pub row_index: Option<String>,
}

/// Seconds as decimal strings, e.g. `duration=60&interval=0.5`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub duration: Option<String>,
    pub interval: Option<String>,
}

fn seconds(raw: Option<&str>) -> Option<Duration> {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

pub async fn list_files(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let files = state.service.spreadsheets().await?;
    Ok(Json(json!({ "files": files })))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

pub async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let duration = seconds(params.duration.as_deref()).unwrap_or(DEFAULT_STREAM_DURATION);
    let interval = seconds(params.interval.as_deref())
        .unwrap_or(DEFAULT_STREAM_INTERVAL)
        .max(MIN_STREAM_INTERVAL);

    let events = state
        .service
        .stream_status(duration, interval)
        .map(|report| Event::default().json_data(report));

    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

pub async fn load(
    State(state): State<AppState>,
    Query(params): Query<FileParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file = params.file.unwrap_or_default();
    info!(file = %file, "load requested");
    let started = state.service.start(&file).await?;
    Ok(Json(started))
}

pub async fn cancel(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = state.service.cancel().await;
    Json(json!({ "cancelled": cancelled }))
}

pub async fn unload(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.service.unload().await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<WordParams>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .service
        .search(params.word.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(result))
}

pub async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<WordParams>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .service
        .lookup(params.word.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(entry))
}

pub async fn row(
    State(state): State<AppState>,
    Query(params): Query<RowParams>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.service.is_loaded() {
        return Err(ApiError::ValidationError("store not loaded".to_string()));
    }

    let sheet = params.sheet.unwrap_or_default();
    let row_index = params
        .row_index
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let Some(row_index) = row_index.filter(|_| !sheet.trim().is_empty()) else {
        return Err(ApiError::ValidationError(
            "missing sheet or row_index".to_string(),
        ));
    };

    let record = state.service.fetch_row(&sheet, row_index).await?;
    Ok(Json(record))
}
