//! Object store access for the endpoints of a chunk's path.
//!
//! The gateway only ever needs two calls: read a byte range of a source
//! object, and write a chunk's bytes into a destination object at the
//! chunk's offset. Cloud-provider clients plug in behind [`ObjectStore`];
//! this crate ships an in-memory store and a local-filesystem store.
//!
//! Local layout:
//!   {root}/{region}/{bucket}/{key}
//!
//! `:` in a region (`aws:us-east-1`) becomes `_` on disk.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use memmap2::Mmap;

use skylark_core::ProtocolError;

/// A `(region, bucket)` pair naming one bucket in one provider region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketRef {
    pub region: String,
    pub bucket: String,
}

impl BucketRef {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
        }
    }
}

impl std::fmt::Display for BucketRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.bucket)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read exactly `len` bytes of `key` starting at `offset`.
    async fn get_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError>;

    /// Write `data` into `key` at `offset`, creating the object if needed.
    /// Other ranges of the object are left as they are.
    async fn put_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<(), TransferError>;
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Process-local store, used for tests and single-node runs.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<(BucketRef, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, bucket: &BucketRef, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .insert((bucket.clone(), key.to_string()), data.into());
    }

    pub fn object(&self, bucket: &BucketRef, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.clone(), key.to_string()))
            .map(|v| Bytes::copy_from_slice(&v))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError> {
        let object = self
            .objects
            .get(&(bucket.clone(), key.to_string()))
            .ok_or_else(|| TransferError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        let range = checked_range(key, offset, len, object.len() as u64)?;
        Ok(Bytes::copy_from_slice(&object[range]))
    }

    async fn put_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<(), TransferError> {
        let start = usize::try_from(offset).map_err(|_| TransferError::OutOfRange {
            key: key.to_string(),
            offset,
            len: data.len() as u64,
            size: 0,
        })?;
        let end = start + data.len();
        let mut object = self
            .objects
            .entry((bucket.clone(), key.to_string()))
            .or_default();
        if object.len() < end {
            object.resize(end, 0);
        }
        object[start..end].copy_from_slice(&data);
        Ok(())
    }
}

// ── Local filesystem ──────────────────────────────────────────────────────────

/// Objects as plain files under a root directory.
///
/// Reads map the file; writes go through positional `pwrite`, so chunks of
/// one object can land concurrently and in any order.
#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk path of an object. Keys that would escape the bucket
    /// directory are rejected.
    pub fn object_path(&self, bucket: &BucketRef, key: &str) -> Result<PathBuf, TransferError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean || bucket.bucket.contains('/') || bucket.bucket.is_empty() {
            return Err(TransferError::InvalidKey(format!("{bucket}/{key}")));
        }
        Ok(self
            .root
            .join(bucket.region.replace([':', '/'], "_"))
            .join(&bucket.bucket)
            .join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError> {
        let path = self.object_path(bucket, key)?;
        let bucket_name = bucket.to_string();
        let key = key.to_string();
        blocking(move || {
            let file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(TransferError::ObjectNotFound {
                        bucket: bucket_name,
                        key,
                    })
                }
                Err(e) => return Err(e.into()),
            };
            let size = file.metadata()?.len();
            let range = checked_range(&key, offset, len, size)?;
            if range.is_empty() {
                return Ok(Bytes::new());
            }
            // Safety: the map is read-only and dropped before returning.
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(Bytes::copy_from_slice(&mmap[range]))
        })
        .await
    }

    async fn put_range(
        &self,
        bucket: &BucketRef,
        key: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<(), TransferError> {
        let path = self.object_path(bucket, key)?;
        blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            file.write_all_at(&data, offset)?;
            file.sync_data()?;
            Ok(())
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        TransferError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?
}

fn checked_range(
    key: &str,
    offset: u64,
    len: u64,
    size: u64,
) -> Result<std::ops::Range<usize>, TransferError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(TransferError::OutOfRange {
            key: key.to_string(),
            offset,
            len,
            size,
        }),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure moving chunk bytes: object store I/O, relay I/O, or a hop timeout.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("object {bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },

    #[error("range {offset}+{len} outside {key} ({size} bytes)")]
    OutOfRange {
        key: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("{op} timed out after {millis}ms")]
    Timeout { op: &'static str, millis: u64 },

    #[error("relay to {addr} failed: {reason}")]
    Relay { addr: String, reason: String },

    #[error("payload for chunk {chunk_id} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        chunk_id: u64,
        expected: u64,
        actual: u64,
    },

    #[error("chunk {0}: wait for inbound payload was abandoned")]
    Abandoned(u64),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
