//! Route table.
//!
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Documents**
//!   - `GET    /documents/{id}`: normalized record and partition fields
//!   - `GET    /documents/{id}/content`: reassembled content
//!   - `DELETE /documents/{id}`: delete the record
//!
//! - **Blobs**
//!   - `PUT | GET | HEAD | DELETE /blobs/{*name}`
//!
//! The wildcard `*name` allows nested names like `3f0c.../scan.pdf.part4`.

use crate::{
    handlers::{
        blob_handlers::{delete_blob, get_blob, head_blob, put_blob},
        document_handlers::{delete_document, get_document, get_document_content},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, put},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/documents/{id}/content", get(get_document_content))
        .route(
            "/blobs/{*name}",
            put(put_blob).get(get_blob).head(head_blob).delete(delete_blob),
        )
}
