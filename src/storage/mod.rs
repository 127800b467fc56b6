//! Storage backends for named byte blobs.
//!
//! Every record, manifest, and document part ends up here. The pipeline only
//! relies on the three operations of [`StorageBackend`]; which concrete store
//! sits behind it is decided once, at startup.

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt::Debug, io};
use thiserror::Error;

pub use disk::DiskStore;
pub use memory::InMemoryStore;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_JSON: &str = "application/json";

const MAX_OBJECT_NAME_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object name `{0}`")]
    InvalidName(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Options for reading a blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetFileOptions {
    pub decrypt: bool,
    pub verify: bool,
}

/// Options for writing a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutFileOptions {
    pub encrypt: bool,
    pub verify: bool,
    pub content_type: Option<String>,
}

impl PutFileOptions {
    /// Unencrypted, unsigned write.
    pub fn public() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A store of named byte blobs.
///
/// Implementations must be safe to share between tasks; every call is
/// independent and may be slow or fail.
#[async_trait]
pub trait StorageBackend: Debug + Send + Sync + 'static {
    async fn get_file(&self, name: &str, options: &GetFileOptions) -> StorageResult<Bytes>;

    async fn put_file(
        &self,
        name: &str,
        contents: Bytes,
        options: &PutFileOptions,
    ) -> StorageResult<()>;

    async fn delete_file(&self, name: &str) -> StorageResult<()>;
}

/// Basic name validation to avoid trivial path traversal vectors.
///
/// Rejects names that begin with `/`, have a `..` path segment, or carry
/// control characters and backslashes. Dots inside a segment are fine.
pub fn ensure_name_safe(name: &str) -> StorageResult<()> {
    if name.is_empty()
        || name.len() > MAX_OBJECT_NAME_LEN
        || name.starts_with('/')
        || name.split('/').any(|segment| segment == "..")
        || name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Neither bundled backend encrypts or signs payloads.
pub(crate) fn ensure_plain_read(options: &GetFileOptions) -> StorageResult<()> {
    if options.decrypt {
        return Err(StorageError::Unsupported("decryption"));
    }
    if options.verify {
        return Err(StorageError::Unsupported("signature verification"));
    }
    Ok(())
}

pub(crate) fn ensure_plain_write(options: &PutFileOptions) -> StorageResult<()> {
    if options.encrypt {
        return Err(StorageError::Unsupported("encryption"));
    }
    if options.verify {
        return Err(StorageError::Unsupported("signing"));
    }
    Ok(())
}
