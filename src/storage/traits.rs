//! Abstract external storage contract.
//!
//! Annotations and raw observations flush their heavy payloads to an
//! [`ExternalStore`] when unloaded and fetch them back when loaded. The
//! world model treats the store as opaque: it only ever handles the path
//! string a store hands back from [`ExternalStore::put`].
//!
//! Implementations:
//! - [`InMemoryExternalStore`](super::InMemoryExternalStore) for tests and
//!   embedded use
//! - `DirectoryStore` (feature `persistent`) for payload files on disk

use std::fmt::Debug;

use uuid::Uuid;

use crate::error::WorldResult;
use crate::id::EntityId;

/// Byte-addressable persistence for unloaded payloads.
///
/// # Safety Considerations
/// - `put` must be durable once it returns: a path handed out may be
///   written into a serialized entity record and resolved in another process
/// - Implementations must handle concurrent access safely
pub trait ExternalStore: Send + Sync + Debug {
    /// Stores `bytes` under `key`, replacing any earlier payload with the same
    /// key, and returns the path that [`Self::get`] resolves.
    fn put(&self, key: &str, bytes: &[u8]) -> WorldResult<String>;

    /// Fetches the payload stored at `path`.
    fn get(&self, path: &str) -> WorldResult<Vec<u8>>;

    /// Returns true if a payload exists at `path`.
    fn contains(&self, path: &str) -> bool;
}

/// Derives the storage key for a payload owned by `parent`.
///
/// Names are hashed so arbitrary annotation names (slashes, spaces,
/// non-ASCII) always produce a portable key. A payload without a stored
/// owner gets a fresh random owner tag on every call, so two detached
/// entities never flush over each other.
#[must_use]
pub fn payload_key(parent: Option<EntityId>, kind: &str, name: &str) -> String {
    let digest = blake3::hash(name.as_bytes()).to_hex();
    let owner = match parent {
        Some(id) if id.is_valid() => format!("e{}", id.get()),
        _ => format!("orphan{}", Uuid::new_v4().simple()),
    };
    format!("{owner}-{kind}-{}", &digest.as_str()[..16])
}
