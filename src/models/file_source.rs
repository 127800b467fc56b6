//! Local byte sources attached to documents while they upload.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    fmt::Debug,
    io::{self, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// Random-access bytes from somewhere other than a local path or memory.
#[async_trait]
pub trait RangeSource: Debug + Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `range` is already clamped to `len()`.
    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes>;
}

#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on local disk; every read opens its own handle.
    Path { path: PathBuf, len: u64 },
    /// Bytes already in memory.
    Memory(Bytes),
    Custom(Arc<dyn RangeSource>),
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(FileSource::Path {
            path,
            len: meta.len(),
        })
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        FileSource::Memory(bytes.into())
    }

    pub fn len(&self) -> u64 {
        match self {
            FileSource::Path { len, .. } => *len,
            FileSource::Memory(bytes) => bytes.len() as u64,
            FileSource::Custom(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File name of a path source.
    pub fn file_name(&self) -> Option<String> {
        match self {
            FileSource::Path { path, .. } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            FileSource::Memory(_) | FileSource::Custom(_) => None,
        }
    }

    /// Read `range`, clamped to the end of the source.
    pub async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        match self {
            FileSource::Memory(bytes) => Ok(bytes.slice(start as usize..end as usize)),
            FileSource::Path { path, .. } => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; (end - start) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
            FileSource::Custom(source) => source.read_range(start..end).await,
        }
    }
}
