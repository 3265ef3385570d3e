use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use wordbook_core::{list_text_documents, read_text_document, ServiceError};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct NameParams {
    pub name: Option<String>,
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let folder = state.text_dir.clone();
    let files = tokio::task::spawn_blocking(move || list_text_documents(&folder))
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(json!({ "files": files })))
}

pub async fn content(
    State(state): State<AppState>,
    Query(params): Query<NameParams>,
) -> Result<impl IntoResponse, ApiError> {
    let folder = state.text_dir.clone();
    let name = params.name.unwrap_or_default();
    let document = tokio::task::spawn_blocking(move || read_text_document(&folder, &name))
        .await
        .map_err(ServiceError::from)??;
    Ok(Json(document))
}
