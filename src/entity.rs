//! Graph nodes of the world model.
//!
//! An [`Entity`] is a pose, keyframe or calibration set with a stable id, a
//! timestamp and a map of named [`Annotation`]s. Keyframes additionally own
//! heavy [`RawObservation`]s that are dropped from memory on unload.
//!
//! The variant is a closed enum so that the load/unload logic below is
//! exhaustive and checked at compile time.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::annotation::{Annotation, RawObservation, Swappable};
use crate::codec;
use crate::error::{WorldModelError, WorldResult};
use crate::id::EntityId;
use crate::storage::ExternalStore;

/// Keyframe-specific state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFrame {
    raw_observations: Option<Vec<RawObservation>>,
}

impl KeyFrame {
    /// Creates a keyframe owning `observations`.
    #[must_use]
    pub fn new(observations: Vec<RawObservation>) -> Self {
        Self {
            raw_observations: Some(observations),
        }
    }

    /// Raw observations, or `None` once they have been unloaded.
    #[must_use]
    pub fn raw_observations(&self) -> Option<&[RawObservation]> {
        self.raw_observations.as_deref()
    }

    /// Returns true while the raw observations are held in memory.
    #[must_use]
    pub const fn has_raw_observations(&self) -> bool {
        self.raw_observations.is_some()
    }

    /// Appends an observation, recreating the collection if it was released.
    pub fn push_observation(&mut self, observation: RawObservation) {
        self.raw_observations
            .get_or_insert_with(Vec::new)
            .push(observation);
    }

    fn release_observations(&mut self, owner: EntityId, store: &dyn ExternalStore) -> WorldResult<()> {
        let Some(observations) = self.raw_observations.as_mut() else {
            return Ok(());
        };
        for (slot, obs) in observations.iter_mut().enumerate() {
            obs.bind(owner, slot);
            obs.unload(store)?;
        }
        debug!(entity_id = %owner, count = observations.len(), "released raw observations");
        self.raw_observations = None;
        Ok(())
    }
}

/// Entity variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// Pose, calibration set or any node without extra state.
    Plain,
    /// Keyframe carrying raw sensor observations.
    KeyFrame(KeyFrame),
}

impl EntityKind {
    /// Stable tag used by the archive format.
    pub(crate) const fn tag(&self) -> u8 {
        match self {
            Self::Plain => 0,
            Self::KeyFrame(_) => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> WorldResult<Self> {
        match tag {
            0 => Ok(Self::Plain),
            1 => Ok(Self::KeyFrame(KeyFrame::default())),
            other => Err(WorldModelError::corrupted(format!("unknown entity kind tag {other}"))),
        }
    }
}

/// A node of the world model graph.
///
/// # Examples
///
/// ```
/// use worldmodel::{Annotation, Entity};
///
/// let mut pose = Entity::plain(chrono::Utc::now());
/// pose.insert_annotation(Annotation::resident("covariance", vec![0; 288]));
/// assert!(!pose.is_unloaded());
/// assert!(!pose.id().is_valid()); // assigned by the store
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: EntityId,
    timestamp: DateTime<Utc>,
    annotations: HashMap<String, Annotation>,
    kind: EntityKind,
}

impl Entity {
    /// Creates a plain entity.
    #[must_use]
    pub fn plain(timestamp: DateTime<Utc>) -> Self {
        Self::with_kind(timestamp, EntityKind::Plain)
    }

    /// Creates a keyframe owning `observations`.
    #[must_use]
    pub fn keyframe(timestamp: DateTime<Utc>, observations: Vec<RawObservation>) -> Self {
        Self::with_kind(timestamp, EntityKind::KeyFrame(KeyFrame::new(observations)))
    }

    /// Creates an entity of the given kind with no id yet.
    #[must_use]
    pub fn with_kind(timestamp: DateTime<Utc>, kind: EntityKind) -> Self {
        Self {
            id: EntityId::INVALID,
            timestamp,
            annotations: HashMap::new(),
            kind,
        }
    }

    /// Store-assigned id, [`EntityId::INVALID`] before insertion.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    /// Point in time this entity represents.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Variant of this entity.
    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Keyframe state, if this entity is a keyframe.
    #[must_use]
    pub const fn as_keyframe(&self) -> Option<&KeyFrame> {
        match &self.kind {
            EntityKind::KeyFrame(kf) => Some(kf),
            EntityKind::Plain => None,
        }
    }

    /// Mutable keyframe state, if this entity is a keyframe.
    pub fn as_keyframe_mut(&mut self) -> Option<&mut KeyFrame> {
        match &mut self.kind {
            EntityKind::KeyFrame(kf) => Some(kf),
            EntityKind::Plain => None,
        }
    }

    /// All annotations keyed by name.
    #[must_use]
    pub const fn annotations(&self) -> &HashMap<String, Annotation> {
        &self.annotations
    }

    /// Mutable access to the annotation map.
    pub fn annotations_mut(&mut self) -> &mut HashMap<String, Annotation> {
        &mut self.annotations
    }

    /// Annotation by name.
    #[must_use]
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.get(name)
    }

    /// Adds an annotation under its own name, returning any annotation it
    /// replaced.
    pub fn insert_annotation(&mut self, mut annotation: Annotation) -> Option<Annotation> {
        if self.id.is_valid() {
            annotation.set_parent_entity_id(self.id);
        }
        self.annotations.insert(annotation.name().to_string(), annotation)
    }

    /// Flushes every annotation and releases keyframe raw observations.
    ///
    /// Already-external annotations are skipped, so calling this twice
    /// performs no extra writes.
    ///
    /// # Errors
    /// Propagates the first storage failure. Annotations processed before the
    /// failure stay unloaded.
    pub fn unload(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        for annotation in self.annotations.values_mut() {
            annotation.set_parent_entity_id(self.id);
            annotation.unload(store)?;
        }

        match &mut self.kind {
            EntityKind::KeyFrame(kf) => kf.release_observations(self.id, store)?,
            EntityKind::Plain => {}
        }

        debug!(entity_id = %self.id, "unloaded entity");
        Ok(())
    }

    /// Brings every annotation back into memory.
    ///
    /// Raw observations released by [`Self::unload`] are not restored; see
    /// [`Self::reload_raw_observations`].
    pub fn load(&mut self, store: &dyn ExternalStore) -> WorldResult<()> {
        for annotation in self.annotations.values_mut() {
            annotation.set_parent_entity_id(self.id);
            annotation.load(store)?;
        }

        match &self.kind {
            EntityKind::KeyFrame(kf) if !kf.has_raw_observations() => {
                warn!(entity_id = %self.id, "keyframe raw observations stay unloaded: reload is not supported");
            }
            EntityKind::KeyFrame(_) | EntityKind::Plain => {}
        }

        debug!(entity_id = %self.id, "loaded entity");
        Ok(())
    }

    /// Restoring released keyframe observations from external storage.
    ///
    /// # Errors
    /// Always returns [`WorldModelError::Unsupported`]: observations are
    /// dropped, not bound to a path, when a keyframe is unloaded.
    pub fn reload_raw_observations(&mut self) -> WorldResult<()> {
        Err(WorldModelError::unsupported(format!(
            "reloading raw observations of entity {}",
            self.id
        )))
    }

    /// True iff every annotation is unloaded.
    ///
    /// Keyframe raw observations are not considered: a keyframe whose
    /// annotations are all external reports unloaded even while its
    /// observations are still resident.
    #[must_use]
    pub fn is_unloaded(&self) -> bool {
        self.annotations.values().all(|a| a.is_unloaded())
    }

    /// Flush-then-export: unloads every annotation, then writes the entity
    /// record to `sink`.
    ///
    /// This is not a pure read. Resident annotation payloads are written to
    /// `store` first so the record only carries paths.
    pub fn serialize_to(&mut self, store: &dyn ExternalStore, sink: &mut impl Write) -> WorldResult<()> {
        codec::write_entity(self, store, sink)
    }

    /// Replaces id, timestamp and annotations with a record read from
    /// `source`. Annotations come back external and are loaded lazily.
    ///
    /// On error the entity is left unchanged.
    pub fn deserialize_from(&mut self, source: &mut impl Read) -> WorldResult<()> {
        codec::read_entity_into(source, self)
    }

    pub(crate) fn restore(&mut self, id: EntityId, timestamp: DateTime<Utc>, annotations: HashMap<String, Annotation>) {
        self.id = id;
        self.timestamp = timestamp;
        self.annotations = annotations;
    }
}
