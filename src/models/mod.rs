//! Core data models.
//!
//! [`document::Document`] is the record the upload pipeline publishes;
//! [`blob::BlobMeta`] maps to the disk store's metadata table via
//! `sqlx::FromRow`.

pub mod blob;
pub mod document;
pub mod file_source;

pub use document::{Document, DocumentVersion, StorageType};
pub use file_source::{FileSource, RangeSource};
