//! An in-memory blob store, suitable for testing or as a scratch backend.

use super::{
    StorageBackend, StorageError, StorageResult, GetFileOptions, PutFileOptions,
    ensure_name_safe, ensure_plain_read, ensure_plain_write,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Process-local blob store. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    blobs: Arc<RwLock<BTreeMap<String, StoredBlob>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, name: &str) -> Option<StoredBlob> {
        self.blobs.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.read().contains_key(name)
    }

    /// All blob names, in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStore {
    async fn get_file(&self, name: &str, options: &GetFileOptions) -> StorageResult<Bytes> {
        ensure_plain_read(options)?;
        self.blobs
            .read()
            .get(name)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn put_file(
        &self,
        name: &str,
        contents: Bytes,
        options: &PutFileOptions,
    ) -> StorageResult<()> {
        ensure_name_safe(name)?;
        ensure_plain_write(options)?;
        let blob = StoredBlob {
            data: contents,
            content_type: options.content_type.clone(),
            last_modified: Utc::now(),
        };
        self.blobs.write().insert(name.to_string(), blob);
        Ok(())
    }

    async fn delete_file(&self, name: &str) -> StorageResult<()> {
        match self.blobs.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryStore::new();
        let opts = PutFileOptions::public().with_content_type("text/plain");
        store
            .put_file("notes/a.txt", Bytes::from_static(b"hello"), &opts)
            .await
            .unwrap();

        let data = store
            .get_file("notes/a.txt", &GetFileOptions::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(
            store.entry("notes/a.txt").unwrap().content_type.as_deref(),
            Some("text/plain")
        );

        store.delete_file("notes/a.txt").await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.delete_file("notes/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .get_file("nope", &GetFileOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let store = InMemoryStore::new();
        let opts = PutFileOptions::public();
        store.put_file("k", Bytes::from_static(b"one"), &opts).await.unwrap();
        store.put_file("k", Bytes::from_static(b"two"), &opts).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(&store.entry("k").unwrap().data[..], b"two");
    }
}
