//! HTTP handlers for published documents.

use crate::{
    errors::AppError,
    models::Document,
    records::{Record, RecordOptions},
    state::AppState,
    storage::{GetFileOptions, OCTET_STREAM},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use tracing::info;

async fn load(state: &AppState, id: &str) -> Result<Document, AppError> {
    Ok(state
        .documents
        .get(id, &GetFileOptions::default())
        .await?)
}

/// GET `/documents/{id}`: the normalized document, partition fields included.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let document = load(&state, &id).await?;
    Ok(Json(Value::Object(document.manifest())))
}

/// GET `/documents/{id}/content`: reassembled bytes.
pub async fn get_document_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let document = load(&state, &id).await?;
    let content = state.downloader.download(&document).await?;

    let content_type = document.content_type.as_deref().unwrap_or(OCTET_STREAM);
    let mut response = Response::new(Body::from(content));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(document.size));
    if let Some(name) = document.name.as_deref() {
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

/// DELETE `/documents/{id}`: removes the record; delete hooks run.
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let mut document = load(&state, &id).await?;
    state
        .documents
        .delete(&mut document, &RecordOptions::default())
        .await?;
    info!(id = document.id().unwrap_or_default(), "Deleted document");
    Ok(StatusCode::NO_CONTENT)
}
