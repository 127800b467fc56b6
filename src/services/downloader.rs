//! Reassembles a document's content from the backend.

use super::{
    progress::ProgressRegister,
    uploader::{DEFAULT_UPLOAD_CONCURRENCY, part_name},
};
use crate::{
    errors::{Error, Result},
    models::Document,
    records::Session,
    storage::{GetFileOptions, StorageBackend},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PartitionedDownloader {
    backend: Arc<dyn StorageBackend>,
    concurrency: usize,
}

impl PartitionedDownloader {
    pub fn new(session: &Session) -> Result<Self> {
        Ok(Self {
            backend: session.backend()?.clone(),
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch the document's bytes. Partitioned documents are fetched part by
    /// part, at most `concurrency` at a time, and joined in part order.
    pub async fn download(&self, document: &Document) -> Result<Bytes> {
        self.download_with_progress(document, None).await
    }

    pub async fn download_with_progress(
        &self,
        document: &Document,
        progress: Option<&ProgressRegister>,
    ) -> Result<Bytes> {
        let url = document
            .url
            .as_deref()
            .ok_or_else(|| Error::InvalidState("document has no url".into()))?;
        let options = GetFileOptions::default();

        let content = if document.is_partitioned() {
            let num_parts = document.part_count.unwrap_or(document.num_parts);
            info!(url, num_parts, "Downloading partitioned document");
            let parts: Vec<Bytes> = stream::iter(0..num_parts)
                .map(|part_number| {
                    let name = part_name(url, part_number);
                    async move {
                        let bytes = self.backend.get_file(&name, &options).await?;
                        if let Some(progress) = progress {
                            progress.add(bytes.len() as u64);
                        }
                        debug!(part = part_number, len = bytes.len(), "fetched part");
                        Ok::<_, Error>(bytes)
                    }
                })
                .buffered(self.concurrency)
                .try_collect()
                .await?;

            let mut content = BytesMut::with_capacity(document.size as usize);
            for part in parts {
                content.extend_from_slice(&part);
            }
            content.freeze()
        } else {
            let bytes = self.backend.get_file(url, &options).await?;
            if let Some(progress) = progress {
                progress.add(bytes.len() as u64);
            }
            bytes
        };

        if content.len() as u64 != document.size {
            return Err(Error::Corrupt(format!(
                "`{url}` reassembled to {} bytes, expected {}",
                content.len(),
                document.size
            )));
        }
        Ok(content)
    }
}
