//! HTTP handlers for raw blob access on the disk store.
//! Bodies are streamed in both directions so large parts never sit in memory.

use crate::{errors::AppError, models::blob::BlobMeta, state::AppState, storage::OCTET_STREAM};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// PUT `/blobs/{*name}`: create or overwrite a blob.
pub async fn put_blob(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

    let meta = state.store.write_stream(&name, content_type, stream).await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/blobs/{*name}`: stream a blob back.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = state.store.open_reader(&name).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/blobs/{*name}`: GET's headers, no body.
pub async fn head_blob(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.store.metadata(&name).await?;
    let mut response = Response::new(Body::empty());
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/blobs/{*name}`
pub async fn delete_blob(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_blob_headers(headers: &mut HeaderMap, meta: &BlobMeta) {
    let content_type = meta.content_type.as_deref().unwrap_or(OCTET_STREAM);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
