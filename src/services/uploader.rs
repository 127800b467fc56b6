//! Moves one local file into the backend as `num_parts` objects named
//! `<url>.part<N>`, then publishes the document's manifest at its id.
//! Reads and uploads are bounded by two independent limiters; a part's upload
//! never holds an upload slot while waiting on its read.

use super::{
    limiter::ConcurrencyLimiter,
    progress::{Progress, ProgressRegister},
};
use crate::{
    errors::{Error, Result},
    models::{Document, FileSource, StorageType},
    records::{Record, Session},
    storage::{APPLICATION_JSON, OCTET_STREAM, PutFileOptions, StorageBackend},
};
use bytes::Bytes;
use futures::{StreamExt, stream::FuturesUnordered};
use std::{ops::Range, sync::Arc};
use tracing::{debug, info, warn};

/// 5 MiB.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_READ_CONCURRENCY: usize = 6;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploaderOptions {
    /// Overrides the document's own part size.
    pub part_size: Option<u64>,
    pub read_concurrency: usize,
    pub upload_concurrency: usize,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            part_size: None,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

/// Parts needed for `size` bytes; an empty file still has one (empty) part.
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size).max(1)
}

/// Byte range of part `part_number`, clamped to `size`.
pub fn part_range(part_number: u64, part_size: u64, size: u64) -> Range<u64> {
    let start = (part_number * part_size).min(size);
    let end = ((part_number + 1) * part_size).min(size);
    start..end
}

pub fn part_name(url: &str, part_number: u64) -> String {
    format!("{url}.part{part_number}")
}

pub struct PartitionedUploader {
    document: Document,
    file: Arc<FileSource>,
    backend: Arc<dyn StorageBackend>,
    part_size: u64,
    num_parts: u64,
    progress: ProgressRegister,
    read_limiter: ConcurrencyLimiter,
    upload_limiter: ConcurrencyLimiter,
}

impl PartitionedUploader {
    /// Identity (`id`, `url`, `created_at`) is assigned here when missing, so
    /// a clone of [`document`](Self::document) taken before uploading retries
    /// onto the same part names.
    pub fn new(
        session: &Session,
        mut document: Document,
        options: UploaderOptions,
    ) -> Result<Self> {
        let backend = session.backend()?.clone();
        let file = document.file.clone().ok_or_else(|| {
            Error::InvalidState("document has no local file attached".into())
        })?;
        if file.len() != document.size {
            return Err(Error::InvalidState(format!(
                "document size {} does not match local file length {}",
                document.size,
                file.len()
            )));
        }

        let part_size = options
            .part_size
            .or(document.part_size)
            .unwrap_or(DEFAULT_PART_SIZE);
        if part_size == 0 {
            return Err(Error::InvalidState("part size must be positive".into()));
        }
        let num_parts = part_count(document.size, part_size);
        document.ensure_identity();

        Ok(Self {
            progress: ProgressRegister::new(document.size),
            file: Arc::new(file),
            backend,
            part_size,
            num_parts,
            read_limiter: ConcurrencyLimiter::new("read", options.read_concurrency),
            upload_limiter: ConcurrencyLimiter::new("upload", options.upload_concurrency),
            document,
        })
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn num_parts(&self) -> u64 {
        self.num_parts
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Clones share slots with the uploader, so they observe its progress.
    pub fn read_limiter(&self) -> &ConcurrencyLimiter {
        &self.read_limiter
    }

    pub fn upload_limiter(&self) -> &ConcurrencyLimiter {
        &self.upload_limiter
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    /// Called with the current state every time another part lands.
    pub fn on_progress(&self, callback: impl Fn(Progress) + Send + Sync + 'static) {
        self.progress.on_change(callback);
    }

    /// Upload every part, then publish the manifest.
    ///
    /// The first failing part fails the call; parts still in flight keep
    /// running to completion on their own and nothing is published.
    pub async fn upload(self) -> Result<Document> {
        let Self {
            mut document,
            file,
            backend,
            part_size,
            num_parts,
            progress,
            read_limiter,
            upload_limiter,
        } = self;

        let url = document.ensure_identity().to_string();
        let size = document.size;
        info!(
            id = document.id().unwrap_or_default(),
            url = %url,
            size,
            num_parts,
            part_size,
            "Starting partitioned upload"
        );

        let mut parts = FuturesUnordered::new();
        for part_number in 0..num_parts {
            let range = part_range(part_number, part_size, size);

            let read = tokio::spawn({
                let file = file.clone();
                let read_limiter = read_limiter.clone();
                async move {
                    read_limiter
                        .schedule(async { file.read_range(range).await.map_err(Error::from) })
                        .await
                }
            });

            let backend = backend.clone();
            let upload_limiter = upload_limiter.clone();
            let progress = progress.clone();
            let name = part_name(&url, part_number);
            parts.push(tokio::spawn(async move {
                let bytes: Bytes = read.await??;
                let len = bytes.len() as u64;
                let options = PutFileOptions::public().with_content_type(OCTET_STREAM);
                upload_limiter
                    .schedule(async {
                        backend
                            .put_file(&name, bytes, &options)
                            .await
                            .map_err(Error::from)
                    })
                    .await?;
                let state = progress.add(len);
                debug!(part = part_number, len, completed = state.completed, "uploaded part");
                Ok::<_, Error>(())
            }));
        }

        while let Some(joined) = parts.next().await {
            if let Err(err) = joined.map_err(Error::from).and_then(|part| part) {
                warn!(url = %url, error = %err, "partitioned upload failed");
                return Err(err);
            }
        }

        read_limiter.dispose();
        upload_limiter.dispose();

        document.storage_type = Some(StorageType::Partitioned);
        document.part_count = Some(num_parts);
        document.part_size = Some(part_size);
        document.num_parts = num_parts;
        publish_manifest(backend.as_ref(), &document).await?;

        document.file = None;
        Ok(document)
    }
}

async fn publish_manifest(backend: &dyn StorageBackend, document: &Document) -> Result<()> {
    let id = document
        .id()
        .ok_or_else(|| Error::InvalidState("cannot publish a manifest without an id".into()))?;
    let contents = serde_json::to_vec(&document.manifest())?;
    let options = PutFileOptions::public().with_content_type(APPLICATION_JSON);
    backend.put_file(id, Bytes::from(contents), &options).await?;
    info!(id, "Published manifest");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::DocumentVersion,
        records::{ID_LENGTH, RecordOptions, RecordService},
        storage::{GetFileOptions, InMemoryStore},
        services::PartitionedDownloader,
        test_support::{FlakyStore, SlowSource},
    };
    use serde_json::Value;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use uuid::Uuid;

    fn bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn document(len: usize) -> Document {
        Document::new("name.pdf", len as u64).with_file(FileSource::from_bytes(bytes(len)))
    }

    #[test]
    fn part_math() {
        assert_eq!(part_count(500, DEFAULT_PART_SIZE), 1);
        assert_eq!(part_count(25, 10), 3);
        assert_eq!(part_count(30, 10), 3);
        assert_eq!(part_count(0, 10), 1);

        let ranges: Vec<_> = (0..3).map(|n| part_range(n, 10, 25)).collect();
        assert_eq!(ranges, [0..10, 10..20, 20..25]);
        assert_eq!(ranges.iter().map(|r| r.end - r.start).sum::<u64>(), 25);
        assert_eq!(part_name("abc", 4), "abc.part4");
    }

    #[test]
    fn construction_validates_inputs() {
        let session = Session::with_backend(InMemoryStore::new());

        let err = PartitionedUploader::new(
            &session,
            Document::new("x", 10),
            UploaderOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidState(_)));

        let options = UploaderOptions {
            part_size: Some(0),
            ..UploaderOptions::default()
        };
        let err = PartitionedUploader::new(&session, document(10), options).err().unwrap();
        assert!(matches!(err, Error::InvalidState(_)));

        let mut mismatched = document(10);
        mismatched.size = 11;
        assert!(PartitionedUploader::new(&session, mismatched, UploaderOptions::default()).is_err());

        let err = PartitionedUploader::new(
            &Session::default(),
            document(10),
            UploaderOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn part_size_prefers_override_then_document() {
        let session = Session::with_backend(InMemoryStore::new());
        let mut doc = document(100);
        doc.part_size = Some(40);

        let uploader =
            PartitionedUploader::new(&session, doc.clone(), UploaderOptions::default()).unwrap();
        assert_eq!((uploader.part_size(), uploader.num_parts()), (40, 3));

        let options = UploaderOptions {
            part_size: Some(25),
            ..UploaderOptions::default()
        };
        let uploader = PartitionedUploader::new(&session, doc, options).unwrap();
        assert_eq!((uploader.part_size(), uploader.num_parts()), (25, 4));
    }

    #[tokio::test]
    async fn single_part_upload_publishes_manifest() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store.clone());
        let uploader =
            PartitionedUploader::new(&session, document(500), UploaderOptions::default()).unwrap();
        assert_eq!(uploader.num_parts(), 1);

        let doc = uploader.upload().await.unwrap();
        let url = doc.url.clone().unwrap();
        assert!(Uuid::parse_str(&url).is_ok());
        assert_eq!(doc.id().map(str::len), Some(ID_LENGTH));
        assert!(!doc.uploaded);
        assert!(doc.file.is_none());

        let part = store.entry(&format!("{url}.part0")).unwrap();
        assert_eq!(part.data.len(), 500);
        assert_eq!(part.content_type.as_deref(), Some(OCTET_STREAM));

        let manifest: Value =
            serde_json::from_slice(&store.entry(doc.id().unwrap()).unwrap().data).unwrap();
        assert_eq!(manifest["numParts"], 1);
        assert_eq!(manifest["num_parts"], 1);
        assert_eq!(manifest["partSize"], DEFAULT_PART_SIZE);
        assert_eq!(manifest["storageType"], "partitioned");
        assert_eq!(manifest["uploaded"], false);
        assert_eq!(manifest["name"], "name.pdf");
        assert_eq!(manifest["version"], 2);
        assert!(manifest.get("file").is_none());
    }

    #[tokio::test]
    async fn multi_part_upload_writes_every_slice_and_reports_progress() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store.clone());
        let options = UploaderOptions {
            part_size: Some(10),
            ..UploaderOptions::default()
        };
        let uploader = PartitionedUploader::new(&session, document(25), options).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let over_total = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            let over_total = over_total.clone();
            uploader.on_progress(move |p| {
                calls.fetch_add(1, Ordering::SeqCst);
                if p.completed > p.total {
                    over_total.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let doc = uploader.upload().await.unwrap();
        let url = doc.url.clone().unwrap();
        let source = bytes(25);
        for (n, range) in [(0, 0..10), (1, 10..20), (2, 20..25)] {
            let part = store.entry(&part_name(&url, n)).unwrap();
            assert_eq!(&part.data[..], &source[range]);
        }
        assert!(!store.contains(&part_name(&url, 3)));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(over_total.load(Ordering::SeqCst), 0);
        assert_eq!(doc.num_parts, 3);
        assert_eq!(doc.part_count, Some(3));
        assert_eq!(doc.part_size, Some(10));
        assert!(doc.is_partitioned());
    }

    #[tokio::test]
    async fn upload_concurrency_stays_within_limit() {
        let store = FlakyStore::new().with_put_delay(Duration::from_millis(10));
        let session = Session::with_backend(store.clone());
        let options = UploaderOptions {
            part_size: Some(4),
            read_concurrency: 6,
            upload_concurrency: 2,
        };
        let uploader = PartitionedUploader::new(&session, document(40), options).unwrap();
        let doc = uploader.upload().await.unwrap();

        assert_eq!(doc.num_parts, 10);
        // Ten parts plus the manifest.
        assert_eq!(store.put_calls(), 11);
        assert!(store.max_in_flight() <= 2, "peak {}", store.max_in_flight());
    }

    #[tokio::test]
    async fn failed_part_fails_upload_without_manifest() {
        let store = FlakyStore::new();
        let session = Session::with_backend(store.clone());
        let mut doc = document(30);
        let url = doc.ensure_identity().to_string();
        let id = doc.id().unwrap().to_string();
        store.fail_put(part_name(&url, 1));

        let options = UploaderOptions {
            part_size: Some(10),
            ..UploaderOptions::default()
        };
        let uploader = PartitionedUploader::new(&session, doc, options).unwrap();
        assert_eq!(uploader.document().url.as_deref(), Some(url.as_str()));
        let err = uploader.upload().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{err:?}");

        // Let detached sibling parts settle before inspecting the store.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.inner.contains(&id));
        assert!(!store.inner.contains(&part_name(&url, 1)));
    }

    #[tokio::test]
    async fn retry_overwrites_same_part_names() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store.clone());
        let options = UploaderOptions {
            part_size: Some(10),
            ..UploaderOptions::default()
        };

        let first = PartitionedUploader::new(&session, document(20), options)
            .unwrap()
            .upload()
            .await
            .unwrap();
        let retry = first.clone().with_file(FileSource::from_bytes(bytes(20)));
        let second = PartitionedUploader::new(&session, retry, options)
            .unwrap()
            .upload()
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.url, second.url);
        // Two parts plus one manifest, no duplicates.
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn published_manifest_loads_as_document() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store);
        let options = UploaderOptions {
            part_size: Some(8),
            ..UploaderOptions::default()
        };
        let doc = PartitionedUploader::new(&session, document(20), options)
            .unwrap()
            .upload()
            .await
            .unwrap();

        let service = RecordService::<Document>::new(session);
        let loaded = service
            .get(doc.id().unwrap(), &GetFileOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded.version, DocumentVersion::V2);
        assert!(loaded.is_partitioned());
        assert_eq!(loaded.num_parts, 3);
        assert_eq!(loaded.part_size, Some(8));
        assert_eq!(loaded.url, doc.url);
    }

    #[tokio::test]
    async fn empty_file_uploads_one_empty_part() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store.clone());
        let doc = PartitionedUploader::new(&session, document(0), UploaderOptions::default())
            .unwrap()
            .upload()
            .await
            .unwrap();
        let part = store.entry(&part_name(doc.url.as_deref().unwrap(), 0)).unwrap();
        assert!(part.data.is_empty());
        assert_eq!(doc.num_parts, 1);
    }

    #[tokio::test]
    async fn reads_stay_within_read_limit() {
        let source = SlowSource::new(bytes(60), Duration::from_millis(10));
        let doc = Document::new("slow.bin", 60).with_file(FileSource::Custom(source.clone()));
        let options = UploaderOptions {
            part_size: Some(5),
            read_concurrency: 3,
            upload_concurrency: 6,
        };
        let store = InMemoryStore::new();
        let uploader =
            PartitionedUploader::new(&Session::with_backend(store.clone()), doc, options).unwrap();
        let doc = uploader.upload().await.unwrap();

        assert_eq!(source.reads(), 12);
        assert_eq!(source.max_in_flight(), 3);
        let part = store.entry(&part_name(doc.url.as_deref().unwrap(), 11)).unwrap();
        assert_eq!(&part.data[..], &bytes(60)[55..]);
    }

    #[tokio::test]
    async fn pending_reads_hold_no_upload_slots() {
        let source = SlowSource::new(bytes(40), Duration::from_millis(150));
        let doc = Document::new("slow.bin", 40).with_file(FileSource::Custom(source.clone()));
        let options = UploaderOptions {
            part_size: Some(10),
            read_concurrency: 2,
            upload_concurrency: 1,
        };
        let store = InMemoryStore::new();
        let uploader =
            PartitionedUploader::new(&Session::with_backend(store.clone()), doc, options).unwrap();
        let upload_limiter = uploader.upload_limiter().clone();
        let read_limiter = uploader.read_limiter().clone();

        let task = tokio::spawn(uploader.upload());
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Every part is still waiting on its read.
        assert_eq!(source.in_flight(), 2);
        assert_eq!(read_limiter.available(), 0);
        assert_eq!(upload_limiter.available(), 1);

        let doc = task.await.unwrap().unwrap();
        assert_eq!(doc.num_parts, 4);
        assert!(upload_limiter.is_disposed());
        assert!(read_limiter.is_disposed());
    }

    #[tokio::test]
    async fn marking_uploaded_keeps_content_reachable() {
        let store = InMemoryStore::new();
        let session = Session::with_backend(store.clone());
        let options = UploaderOptions {
            part_size: Some(10),
            ..UploaderOptions::default()
        };
        let mut doc = PartitionedUploader::new(&session, document(25), options)
            .unwrap()
            .upload()
            .await
            .unwrap();

        let service = RecordService::<Document>::new(session.clone());
        doc.uploaded = true;
        service.save(&mut doc, &RecordOptions::default()).await.unwrap();

        let loaded = service
            .get(doc.id().unwrap(), &GetFileOptions::default())
            .await
            .unwrap();
        assert!(loaded.uploaded);
        assert!(loaded.is_partitioned());
        assert_eq!(loaded.part_size, Some(10));
        assert_eq!(loaded.num_parts, 3);

        let content = PartitionedDownloader::new(&session)
            .unwrap()
            .download(&loaded)
            .await
            .unwrap();
        assert_eq!(&content[..], &bytes(25)[..]);
    }

    #[tokio::test]
    async fn url_ending_in_a_dot_uploads() {
        let store = InMemoryStore::new();
        let mut doc = document(15);
        doc.url = Some("folder/report.".into());
        let options = UploaderOptions {
            part_size: Some(10),
            ..UploaderOptions::default()
        };
        PartitionedUploader::new(&Session::with_backend(store.clone()), doc, options)
            .unwrap()
            .upload()
            .await
            .unwrap();

        assert!(store.contains("folder/report..part0"));
        assert!(store.contains("folder/report..part1"));
    }
}
