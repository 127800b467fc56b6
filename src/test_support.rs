//! Backends and byte sources for exercising failure and concurrency paths
//! in tests.

use crate::{
    models::RangeSource,
    storage::{
        GetFileOptions, InMemoryStore, PutFileOptions, StorageBackend, StorageError,
        StorageResult,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    io,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// An [`InMemoryStore`] that can fail chosen writes, delay every write, and
/// records how many writes were in flight at once.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    state: Arc<FlakyState>,
}

#[derive(Debug, Default)]
struct FlakyState {
    failing: Mutex<HashSet<String>>,
    put_delay: Mutex<Option<Duration>>,
    put_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write to `name` fails with an I/O error.
    pub fn fail_put(&self, name: impl Into<String>) {
        self.state.failing.lock().insert(name.into());
    }

    pub fn with_put_delay(self, delay: Duration) -> Self {
        *self.state.put_delay.lock() = Some(delay);
        self
    }

    pub fn put_calls(&self) -> usize {
        self.state.put_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for FlakyStore {
    async fn get_file(&self, name: &str, options: &GetFileOptions) -> StorageResult<Bytes> {
        self.inner.get_file(name, options).await
    }

    async fn put_file(
        &self,
        name: &str,
        contents: Bytes,
        options: &PutFileOptions,
    ) -> StorageResult<()> {
        self.state.put_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.state.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self.state.failing.lock().contains(name);
        let result = if fail {
            Err(StorageError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("injected failure writing `{name}`"),
            )))
        } else {
            self.inner.put_file(name, contents, options).await
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.inner.delete_file(name).await
    }
}

/// In-memory bytes that take `delay` per read and record how many reads
/// overlapped.
#[derive(Debug)]
pub struct SlowSource {
    data: Bytes,
    delay: Duration,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowSource {
    pub fn new(data: impl Into<Bytes>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            data: data.into(),
            delay,
            reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeSource for SlowSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}
