//! Lazily loadable payloads attached to entities.
//!
//! Both [`Annotation`]s and keyframe [`RawObservation`]s hold a heavy byte
//! payload that is either resident in memory or flushed to an
//! [`ExternalStore`]. The [`Swappable`] trait is the capability the entity
//! lifecycle relies on.

use tracing::debug;

use crate::error::{WorldModelError, WorldResult};
use crate::id::EntityId;
use crate::storage::{payload_key, ExternalStore};

/// Residency of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadState {
    /// Payload bytes held in memory.
    Resident(Vec<u8>),
    /// Payload flushed to external storage at the given path.
    External(String),
}

impl PayloadState {
    /// Flushes a resident payload under `key` and switches to the external
    /// state. An external payload is left untouched.
    ///
    /// Returns true if a write happened.
    fn flush(&mut self, store: &dyn ExternalStore, key: impl FnOnce() -> String) -> WorldResult<bool> {
        let Self::Resident(bytes) = self else {
            return Ok(false);
        };
        let path = store.put(&key(), bytes)?;
        *self = Self::External(path);
        Ok(true)
    }

    /// Fetches an external payload back into memory.
    ///
    /// Returns true if a read happened.
    fn fetch(&mut self, store: &dyn ExternalStore) -> WorldResult<bool> {
        let Self::External(path) = self else {
            return Ok(false);
        };
        let bytes = store.get(path)?;
        *self = Self::Resident(bytes);
        Ok(true)
    }
}

/// Capability of anything whose payload can be swapped to external storage.
pub trait Swappable {
    /// Brings the payload into memory. No-op when already resident.
    fn load(&mut self, store: &dyn ExternalStore) -> WorldResult<()>;

    /// Flushes the payload to external storage and drops it from memory.
    /// No-op when already external.
    fn unload(&mut self, store: &dyn ExternalStore) -> WorldResult<()>;

    /// Returns true if the payload lives only in external storage.
    fn is_unloaded(&self) -> bool;
}

/// A named payload attached to an entity.
///
/// # Examples
///
/// ```
/// use worldmodel::{Annotation, InMemoryExternalStore, Swappable};
///
/// let store = InMemoryExternalStore::new();
/// let mut scan = Annotation::resident("scan", vec![1, 2, 3]);
/// assert!(!scan.is_unloaded());
///
/// scan.unload(&store).unwrap();
/// assert!(scan.is_unloaded());
/// assert!(scan.external_storage().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    name: String,
    parent: Option<EntityId>,
    state: PayloadState,
}

impl Annotation {
    /// Creates an annotation holding `bytes` in memory.
    #[must_use]
    pub fn resident(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            state: PayloadState::Resident(bytes),
        }
    }

    /// Creates an annotation bound to an external path, payload not loaded.
    #[must_use]
    pub fn external(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            state: PayloadState::External(path.into()),
        }
    }

    /// Annotation name, unique under its owning entity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records the owning entity.
    pub fn set_parent_entity_id(&mut self, id: EntityId) {
        self.parent = Some(id);
    }

    /// Owning entity, if it has processed this annotation yet.
    #[must_use]
    pub const fn parent_entity_id(&self) -> Option<EntityId> {
        self.parent
    }

    /// Binds the annotation to `path`, discarding any resident payload.
    pub fn set_as_external(&mut self, path: impl Into<String>) {
        self.state = PayloadState::External(path.into());
    }

    /// External path, present only in the unloaded state.
    #[must_use]
    pub fn external_storage(&self) -> Option<&str> {
        match &self.state {
            PayloadState::External(path) => Some(path),
            PayloadState::Resident(_) => None,
        }
    }

    /// Resident payload bytes, if loaded.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.state {
            PayloadState::Resident(bytes) => Some(bytes),
            PayloadState::External(_) => None,
        }
    }

    /// Replaces the payload with new in-memory bytes.
    pub fn set_payload(&mut self, bytes: Vec<u8>) {
        self.state = PayloadState::Resident(bytes);
    }

    /// Current residency.
    #[must_use]
    pub const fn state(&self) -> &PayloadState {
        &self.state
    }

    /// Unloads (if needed) and returns the external path.
    ///
    /// This is the per-annotation step of flush-then-export serialization.
    pub(crate) fn flush_for_export(&mut self, store: &dyn ExternalStore) -> WorldResult<&str> {
        self.unload(store)?;
        self.external_storage()
            .ok_or_else(|| WorldModelError::MissingExternalPath {
                name: self.name.clone(),
            })
    }

    fn storage_key(&self) -> String {
        payload_key(self.parent, "ann", &self.name)
    }
}

impl Swappable for Annotation {
    fn load(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        if self.state.fetch(store)? {
            debug!(entity_id = ?self.parent, annotation = %self.name, "loaded annotation");
        }
        Ok(())
    }

    fn unload(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        let key = self.storage_key();
        if self.state.flush(store, || key)? {
            debug!(entity_id = ?self.parent, annotation = %self.name, "unloaded annotation");
        }
        Ok(())
    }

    fn is_unloaded(&self) -> bool {
        matches!(self.state, PayloadState::External(_))
    }
}

/// Heavy raw sensor observation carried by a keyframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    sensor_label: String,
    parent: Option<EntityId>,
    slot: usize,
    state: PayloadState,
}

impl RawObservation {
    /// Creates an observation with its payload in memory.
    #[must_use]
    pub fn new(sensor_label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            sensor_label: sensor_label.into(),
            parent: None,
            slot: 0,
            state: PayloadState::Resident(bytes),
        }
    }

    /// Sensor that produced the observation.
    #[must_use]
    pub fn sensor_label(&self) -> &str {
        &self.sensor_label
    }

    /// Resident payload bytes, if loaded.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.state {
            PayloadState::Resident(bytes) => Some(bytes),
            PayloadState::External(_) => None,
        }
    }

    /// Current residency.
    #[must_use]
    pub const fn state(&self) -> &PayloadState {
        &self.state
    }

    /// Position of this observation inside its keyframe. Distinguishes
    /// storage keys of observations sharing a sensor label.
    pub(crate) fn bind(&mut self, parent: EntityId, slot: usize) {
        self.parent = Some(parent);
        self.slot = slot;
    }
}

impl Swappable for RawObservation {
    fn load(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        self.state.fetch(store).map(|_| ())
    }

    fn unload(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        let kind = format!("obs{}", self.slot);
        let key = payload_key(self.parent, &kind, &self.sensor_label);
        self.state.flush(store, || key).map(|_| ())
    }

    fn is_unloaded(&self) -> bool {
        matches!(self.state, PayloadState::External(_))
    }
}
