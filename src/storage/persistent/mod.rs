//! Persistent external storage backend.
//!
//! Payloads flushed by unloaded annotations and raw observations land in a
//! single directory:
//! - one CRC32-framed file per payload
//! - atomic temp-file-then-rename writes
//! - an exclusive file lock so only one process flushes into the directory
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── .lock
//! ├── e0-ann-1f0c9a6b2d4e8f10.wmp
//! ├── e0-obs0-7a3b5c9d1e2f4a6b.wmp
//! └── ...
//! ```

mod codec;
mod directory;
mod file_lock;

pub use directory::DirectoryStore;
pub use file_lock::FileLock;

use std::path::Path;

/// Configuration for the on-disk payload store.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync every payload file before renaming it into place.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Opens or creates a payload directory at `path`.
///
/// # Example
/// ```rust,ignore
/// use worldmodel::storage::persistent::open_directory_store;
///
/// let store = open_directory_store("./map.payloads", None)?;
/// ```
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
pub fn open_directory_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> crate::error::WorldResult<DirectoryStore> {
    DirectoryStore::open(path, config.unwrap_or_default())
}
