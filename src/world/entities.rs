//! Identity-indexed entity container.
//!
//! Not synchronized on its own: the world model keeps it behind the entities
//! `RwLock` and only hands it out through lock guards.

use std::collections::BTreeMap;

use crate::entity::Entity;
use crate::error::{WorldModelError, WorldResult};
use crate::id::{EntityId, IdAllocator};

/// All entities of a world model, keyed by id.
#[derive(Debug, Default)]
pub struct EntityStore {
    by_id: BTreeMap<EntityId, Entity>,
    ids: IdAllocator,
}

impl EntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `entity`, assigns it a fresh id and returns the id.
    ///
    /// # Errors
    /// [`WorldModelError::IdSpaceExhausted`] if no id is left to assign.
    pub fn emplace(&mut self, mut entity: Entity) -> WorldResult<EntityId> {
        let id = EntityId::new(self.ids.issue()?);
        entity.set_id(id);
        for annotation in entity.annotations_mut().values_mut() {
            annotation.set_parent_entity_id(id);
        }
        self.by_id.insert(id, entity);
        Ok(id)
    }

    /// Stores a copy of `entity` under a fresh id.
    pub fn insert_copy(&mut self, entity: &Entity) -> WorldResult<EntityId> {
        self.emplace(entity.clone())
    }

    /// Checks that an entity carrying `id` could be restored.
    ///
    /// # Errors
    /// [`WorldModelError::CorruptedData`] if the id is the invalid sentinel
    /// or already taken.
    pub(crate) fn check_restorable(&self, id: EntityId) -> WorldResult<()> {
        if !id.is_valid() {
            return Err(WorldModelError::corrupted("restored entity carries the invalid id"));
        }
        if self.by_id.contains_key(&id) {
            return Err(WorldModelError::corrupted(format!("entity {id} already exists")));
        }
        Ok(())
    }

    /// Re-inserts an entity that already carries an id (archive import).
    ///
    /// # Errors
    /// See [`Self::check_restorable`].
    pub(crate) fn restore(&mut self, entity: Entity) -> WorldResult<EntityId> {
        let id = entity.id();
        self.check_restorable(id)?;
        self.ids.reserve(id.get());
        self.by_id.insert(id, entity);
        Ok(id)
    }

    /// Entity by id.
    ///
    /// # Errors
    /// [`WorldModelError::EntityNotFound`] if no entity has this id.
    pub fn get(&self, id: EntityId) -> WorldResult<&Entity> {
        self.by_id.get(&id).ok_or(WorldModelError::EntityNotFound { id })
    }

    /// Mutable entity by id.
    ///
    /// # Errors
    /// [`WorldModelError::EntityNotFound`] if no entity has this id.
    pub fn get_mut(&mut self, id: EntityId) -> WorldResult<&mut Entity> {
        self.by_id.get_mut(&id).ok_or(WorldModelError::EntityNotFound { id })
    }

    /// Returns true if an entity has this id.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Every stored id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<EntityId> {
        self.by_id.keys().copied().collect()
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if no entity is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates over all entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.by_id.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.by_id.values_mut()
    }
}
