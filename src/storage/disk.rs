//! src/storage/disk.rs
//!
//! DiskStore: durable blob backend with SQLite for metadata and local disk for
//! payloads sharded beneath `base_path/{shard}/{shard}/{name}`.

use super::{
    GetFileOptions, PutFileOptions, StorageBackend, StorageError, StorageResult,
    ensure_name_safe, ensure_plain_read, ensure_plain_write,
};
use crate::models::blob::BlobMeta;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// DiskStore provides the blob operations the record and upload layers need:
/// - Write a blob (streams bytes to disk and upserts metadata into SQLite)
/// - Read a blob (metadata from SQLite, payload from disk)
/// - Delete a blob (drops the metadata row and removes the file)
#[derive(Clone, Debug)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    pub base_path: PathBuf,
}

impl DiskStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open (creating if needed) the SQLite database at `database_url` and the
    /// payload directory at `base_path`.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            info!("Created storage directory at {}", base_path.display());
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }
        debug!("Connecting to SQLite at {:?}", options.get_filename());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self::new(Arc::new(pool), base_path))
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for a blob name.
    ///
    /// Uses MD5(name) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn blob_shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified payload path: base_path/{shard}/{shard}/{name}.
    /// Parent directories may not exist yet.
    fn blob_path(&self, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(name);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    async fn fetch_meta(&self, name: &str) -> StorageResult<BlobMeta> {
        sqlx::query_as::<_, BlobMeta>(
            "SELECT id, name, content_type, size_bytes, etag, last_modified
             FROM blobs WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound(name.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream a blob to disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts the metadata row (overwrite semantics).
    ///
    /// Temp files are removed on every error path.
    pub async fn write_stream<S>(
        &self,
        name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<BlobMeta>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_name_safe(name)?;

        let file_path = self.blob_path(name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());

        let meta = sqlx::query_as::<_, BlobMeta>(
            r#"
            INSERT INTO blobs (id, name, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, name, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match meta {
            Ok(meta) => {
                debug!(name, size_bytes, etag = %meta.etag, "stored blob");
                Ok(meta)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Metadata and an opened file handle ready for streaming out.
    /// NotFound when the row exists but the payload is missing.
    pub async fn open_reader(&self, name: &str) -> StorageResult<(BlobMeta, File)> {
        ensure_name_safe(name)?;
        let meta = self.fetch_meta(name).await?;
        let file = File::open(self.blob_path(name)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((meta, file))
    }

    pub async fn metadata(&self, name: &str) -> StorageResult<BlobMeta> {
        ensure_name_safe(name)?;
        self.fetch_meta(name).await
    }

    /// Drop the metadata row and remove the payload, pruning empty shard
    /// directories afterwards.
    pub async fn remove(&self, name: &str) -> StorageResult<BlobMeta> {
        ensure_name_safe(name)?;
        let meta = self.fetch_meta(name).await?;

        let result = sqlx::query("DELETE FROM blobs WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(name.to_string()));
        }

        let file_path = self.blob_path(name);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(meta)
    }

    /// Remove empty directories upward, stopping below `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for DiskStore {
    async fn get_file(&self, name: &str, options: &GetFileOptions) -> StorageResult<Bytes> {
        ensure_plain_read(options)?;
        let (meta, mut file) = self.open_reader(name).await?;
        let mut buf = Vec::with_capacity(meta.size_bytes.max(0) as usize);
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put_file(
        &self,
        name: &str,
        contents: Bytes,
        options: &PutFileOptions,
    ) -> StorageResult<()> {
        ensure_plain_write(options)?;
        let body = stream::once(async move { Ok::<_, io::Error>(contents) });
        self.write_stream(name, options.content_type.clone(), body)
            .await
            .map(|_| ())
    }

    async fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.remove(name).await.map(|_| ())
    }
}
