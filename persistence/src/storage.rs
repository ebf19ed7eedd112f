//! Key/value storage backends and the typed handle the engine uses
//!
//! Two backends implement the same contract: a small in-memory store for
//! session metadata and the index, and a file-backed store for dataset,
//! filter, chart, and chunk blobs. Missing keys are `None`/`false`, never
//! errors; backends fail only at the serialization or I/O boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs as async_fs;
use tracing::debug;
use tracing::warn;

use crate::codec;
use crate::codec::Payload;
use crate::error::PersistenceError;
use crate::error::Result;

/// Contract implemented by both storage backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`, `None` when absent.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, returning whether the write succeeded.
    async fn set_raw(&self, key: &str, bytes: Vec<u8>) -> Result<bool>;

    /// Remove `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Cheaply clonable typed view over a backend. Values travel as MessagePack.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn KeyValueStore>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { inner: store }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get_raw(key).await? {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes).map_err(|e| {
                    PersistenceError::CorruptPayload(format!("record at {key} failed to decode: {e}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let bytes = rmp_serde::to_vec(value)?;
        self.inner.set_raw(key, bytes).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key).await
    }

    /// Read a codec-wrapped value stored under `key`.
    pub async fn get_payload<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get::<Payload>(key).await? {
            Some(payload) => Ok(Some(codec::deserialize(&payload)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` through the codec (compressing when large).
    pub async fn set_payload<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        self.set(key, &codec::serialize(value)?).await
    }

    /// Best-effort removal for cleanup paths: missing keys and backend
    /// failures are logged, not fatal.
    pub async fn discard(&self, key: &str) {
        match self.remove(key).await {
            Ok(true) => {}
            Ok(false) => debug!(key, "key already absent during cleanup"),
            Err(e) => warn!(key, error = %e, "failed to remove key during cleanup"),
        }
    }
}

/// In-memory backend: the small-capacity synchronous store, and the test
/// double for both stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn set_raw(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }
}

/// File-backed backend: the larger-capacity asynchronous store. One file per
/// key under a base directory, written to a temp sibling and atomically
/// renamed into place.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys only contain [A-Za-z0-9:-]; colons are not portable file names.
        self.root.join(key.replace(':', "_"))
    }

    fn storage_error(key: &str, source: std::io::Error) -> PersistenceError {
        PersistenceError::Storage {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match async_fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::storage_error(key, e)),
        }
    }

    async fn set_raw(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        async_fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Self::storage_error(key, e))?;

        let path = self.entry_path(key);
        let temp_path = path.with_extension("tmp");
        async_fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| Self::storage_error(key, e))?;
        async_fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Self::storage_error(key, e))?;

        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match async_fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::storage_error(key, e)),
        }
    }
}
