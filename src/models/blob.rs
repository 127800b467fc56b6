//! Metadata row for a blob held by the disk store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents a single named blob.
///
/// The struct stores the blob's metadata, not the content bytes, which live
/// on disk beneath the store's base path.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BlobMeta {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Blob name (path-like, e.g. `3f0c...e1.part4`).
    pub name: String,

    /// Content type (MIME type), if the writer supplied one.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: String,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}
