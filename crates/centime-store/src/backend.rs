// Storage substrate trait and the in-process implementation.
//
// The durable key -> string map underneath the store is an external
// collaborator (on device it is the platform's async storage API). The
// `Store` only ever talks to it through `StorageBackend`, so tests and
// non-device hosts can swap in `MemoryBackend`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Failure modes of the storage substrate.
///
/// `QuotaExceeded` is distinguished because it triggers the store's
/// eviction-and-retry path rather than surfacing to the caller directly.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The write could not complete because the substrate is full.
    #[error("storage capacity exceeded")]
    QuotaExceeded,

    /// Any other substrate failure (I/O, corruption, platform bridge).
    #[error("storage backend failure: {0}")]
    Other(String),
}

/// The durable key -> string map the store is built on.
///
/// Used as `Arc<dyn StorageBackend>`. Values are opaque strings; all
/// JSON encoding/decoding happens above this trait in [`Store`](crate::Store).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the raw value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Write `value` under `key`, replacing any existing entry.
    async fn set(&self, key: &str, value: String) -> Result<(), BackendError>;

    /// Write several entries in one call.
    async fn multi_set(&self, pairs: Vec<(String, String)>) -> Result<(), BackendError>;

    /// Delete the entry for `key`. Deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BackendError>;

    /// All keys currently present in the substrate.
    async fn get_all_keys(&self) -> Result<Vec<String>, BackendError>;

    /// Delete everything.
    async fn clear(&self) -> Result<(), BackendError>;
}

/// In-process `StorageBackend` backed by a `DashMap`.
///
/// The default substrate for tests and non-device hosts. An optional byte
/// quota makes it report `QuotaExceeded` like a real device store, which is
/// how the eviction path gets exercised.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
    used_bytes: AtomicUsize,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend that rejects writes once `quota_bytes` of key + value
    /// data are stored.
    pub fn with_quota(quota_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            used_bytes: AtomicUsize::new(0),
            quota_bytes: Some(quota_bytes),
        })
    }

    /// Total bytes of key + value data currently stored.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }

    fn check_quota(&self, incoming: usize, replaced: usize) -> Result<(), BackendError> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used = self.used_bytes.load(Ordering::Relaxed);
        if used - replaced + incoming > quota {
            return Err(BackendError::QuotaExceeded);
        }
        Ok(())
    }

    fn insert(&self, key: String, value: String) {
        let incoming = Self::entry_size(&key, &value);
        let replaced = self
            .entries
            .insert(key.clone(), value)
            .map_or(0, |old| Self::entry_size(&key, &old));
        self.used_bytes.fetch_add(incoming, Ordering::Relaxed);
        self.used_bytes.fetch_sub(replaced, Ordering::Relaxed);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        let replaced = self
            .entries
            .get(key)
            .map_or(0, |entry| Self::entry_size(key, entry.value()));
        self.check_quota(Self::entry_size(key, &value), replaced)?;
        self.insert(key.to_owned(), value);
        Ok(())
    }

    async fn multi_set(&self, pairs: Vec<(String, String)>) -> Result<(), BackendError> {
        let incoming: usize = pairs
            .iter()
            .map(|(key, value)| Self::entry_size(key, value))
            .sum();
        let replaced: usize = pairs
            .iter()
            .filter_map(|(key, _)| {
                self.entries
                    .get(key)
                    .map(|entry| Self::entry_size(key, entry.value()))
            })
            .sum();
        self.check_quota(incoming, replaced)?;
        for (key, value) in pairs {
            self.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        if let Some((k, v)) = self.entries.remove(key) {
            self.used_bytes
                .fetch_sub(Self::entry_size(&k, &v), Ordering::Relaxed);
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.entries.clear();
        self.used_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }
}
