//! External storage for unloaded payloads.
//!
//! The [`ExternalStore`] trait defines the contract; backends live in
//! submodules.

mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

#[cfg(test)]
pub(crate) use memory::FailingExternalStore;
pub use memory::InMemoryExternalStore;
#[cfg(feature = "persistent")]
pub use persistent::{open_directory_store, DirectoryStore, FileLock, PersistentConfig};
pub use traits::{payload_key, ExternalStore};
