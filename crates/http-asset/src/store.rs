//! Persistent storage of [`CacheRecord`]s.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;
use tokio::fs;

use crate::cache_key::CacheKey;
use crate::record::CacheRecord;

/// A key-value store of cache records.
///
/// Implementations must replace records atomically: a [`load`](Self::load) never observes a
/// partially written record.
pub trait RecordStore: fmt::Debug + Send + Sync + 'static {
    /// Loads the record stored for `key`.
    ///
    /// Returns `Ok(None)` if there is no usable record. Errors are reserved for genuine storage
    /// failures.
    fn load<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, io::Result<Option<CacheRecord>>>;

    /// Replaces the record stored for `key`.
    fn save<'a>(&'a self, key: &'a CacheKey, record: &'a CacheRecord)
    -> BoxFuture<'a, io::Result<()>>;
}

/// Stores every record as a JSON file named after its key inside a root directory.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    /// Creates a store below `root`.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the record file for `key`.
    pub fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    async fn load_record(&self, key: &CacheKey) -> io::Result<Option<CacheRecord>> {
        let path = self.record_path(key);
        tracing::trace!("Trying cache record at path {}", path.display());

        let Some(data) = catch_not_found(fs::read(&path).await)? else {
            return Ok(None);
        };

        // An empty or otherwise unreadable record is a cache miss, it is overwritten by the
        // next successful fetch.
        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    "Discarding unusable cache record at path {}",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    async fn save_record(&self, key: &CacheKey, record: &CacheRecord) -> io::Result<()> {
        let path = self.record_path(key);
        tracing::trace!("Writing cache record at path {}", path.display());

        let mut temp_file = self.tempfile().await?;
        serde_json::to_writer(&mut temp_file, record)?;
        temp_file.flush()?;

        persist_tempfile(temp_file, &path)?;
        Ok(())
    }

    /// Creates a temporary file next to the records, so it can be moved into place atomically.
    async fn tempfile(&self) -> io::Result<NamedTempFile> {
        // Someone could remove the directory between creating it and creating the file, so
        // retry the fs operations.
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(&self.root).await {
                tracing::error!(
                    "Failed to create cache directory {}: {:?}",
                    self.root.display(),
                    e
                );
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new()
                .prefix(".tmp")
                .tempfile_in(&self.root)
            {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    tracing::error!("Failed to create cache file: {:?}", e);
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                    continue;
                }
            }
        }
    }
}

impl RecordStore for FsRecordStore {
    fn load<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, io::Result<Option<CacheRecord>>> {
        Box::pin(self.load_record(key))
    }

    fn save<'a>(
        &'a self,
        key: &'a CacheKey,
        record: &'a CacheRecord,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(self.save_record(key, record))
    }
}

fn persist_tempfile(temp_file: NamedTempFile, path: &Path) -> io::Result<()> {
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn catch_not_found<R>(result: io::Result<R>) -> io::Result<Option<R>> {
    match result {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}

/// Keeps records in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<CacheKey, CacheRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record stored for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Stores `record` for `key` without going through the async interface.
    pub fn insert(&self, key: CacheKey, record: CacheRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, record);
    }
}

impl RecordStore for MemoryRecordStore {
    fn load<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, io::Result<Option<CacheRecord>>> {
        let record = self.get(key);
        Box::pin(async move { Ok(record) })
    }

    fn save<'a>(
        &'a self,
        key: &'a CacheKey,
        record: &'a CacheRecord,
    ) -> BoxFuture<'a, io::Result<()>> {
        self.insert(key.clone(), record.clone());
        Box::pin(async { Ok(()) })
    }
}
