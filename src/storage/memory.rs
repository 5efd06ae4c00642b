//! In-memory external storage backend.
//!
//! Thread-safe implementation of [`ExternalStore`] that keeps payloads in a
//! map. It is intended for tests and embedded use; it also counts writes so
//! callers can verify that an idempotent unload performs no extra flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{lock_err, WorldModelError, WorldResult};
use crate::storage::traits::ExternalStore;

const PATH_PREFIX: &str = "mem://";

/// Thread-safe in-memory payload store.
#[derive(Debug, Default)]
pub struct InMemoryExternalStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl InMemoryExternalStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls since creation.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Number of distinct payloads held.
    pub fn len(&self) -> WorldResult<usize> {
        let blobs = self.blobs.read().map_err(|_| lock_err("memory_store.len"))?;
        Ok(blobs.len())
    }

    /// Returns true if no payload is stored.
    pub fn is_empty(&self) -> WorldResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl ExternalStore for InMemoryExternalStore {
    fn put(&self, key: &str, bytes: &[u8]) -> WorldResult<String> {
        let path = format!("{PATH_PREFIX}{key}");
        let mut blobs = self.blobs.write().map_err(|_| lock_err("memory_store.put"))?;
        blobs.insert(path.clone(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(path)
    }

    fn get(&self, path: &str) -> WorldResult<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| lock_err("memory_store.get"))?;
        blobs.get(path).cloned().ok_or_else(|| {
            WorldModelError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no payload stored at {path}"),
            ))
        })
    }

    fn contains(&self, path: &str) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(path))
            .unwrap_or(false)
    }
}

/// Store whose `put` starts failing once a budget of successful writes is
/// spent. Test-only.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct FailingExternalStore {
    inner: InMemoryExternalStore,
    puts_left: AtomicUsize,
}

#[cfg(test)]
impl FailingExternalStore {
    /// Accepts `ok_puts` writes, then fails every later one.
    pub(crate) fn fail_after(ok_puts: usize) -> Self {
        Self {
            inner: InMemoryExternalStore::new(),
            puts_left: AtomicUsize::new(ok_puts),
        }
    }

    pub(crate) fn write_count(&self) -> usize {
        self.inner.write_count()
    }
}

#[cfg(test)]
impl ExternalStore for FailingExternalStore {
    fn put(&self, key: &str, bytes: &[u8]) -> WorldResult<String> {
        let granted = self
            .puts_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(WorldModelError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("refusing to store {key}"),
            )));
        }
        self.inner.put(key, bytes)
    }

    fn get(&self, path: &str) -> WorldResult<Vec<u8>> {
        self.inner.get(path)
    }

    fn contains(&self, path: &str) -> bool {
        self.inner.contains(path)
    }
}
