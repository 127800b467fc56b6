use crate::{
    errors::Result,
    models::Document,
    records::RecordService,
    services::PartitionedDownloader,
    storage::DiskStore,
};
use std::sync::Arc;

/// Shared handler state. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Raw blob access for the `/blobs` routes and readiness probe.
    pub store: DiskStore,
    pub documents: Arc<RecordService<Document>>,
    pub downloader: PartitionedDownloader,
}

impl AppState {
    pub fn new(store: DiskStore, documents: Arc<RecordService<Document>>) -> Result<Self> {
        let downloader = PartitionedDownloader::new(documents.session())?;
        Ok(Self {
            store,
            documents,
            downloader,
        })
    }
}
