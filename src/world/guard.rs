//! Lock guards over the entity and factor stores.
//!
//! The stores are only reachable through these guards. Entity lookups made
//! through a guard refresh the entity in the [`AccessTracker`]; factor
//! lookups do not. Every guard registers its lock rank before blocking so
//! the entities-before-factors order is checked in debug builds.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::Entity;
use crate::error::{lock_err, WorldModelError, WorldResult};
use crate::factor::Factor;
use crate::id::{EntityId, FactorId};

use super::entities::EntityStore;
use super::factors::FactorStore;
use super::lock_order::{self, Rank, RankToken};
use super::tracker::AccessTracker;

fn check_references(entities: &EntityStore, factor: &Factor) -> WorldResult<()> {
    match factor.connected().iter().find(|&&id| !entities.contains(id)) {
        Some(&id) => Err(WorldModelError::DanglingReference { id }),
        None => Ok(()),
    }
}

/// Shared access to the entity store.
#[derive(Debug)]
pub struct EntitiesRead<'a> {
    store: RwLockReadGuard<'a, EntityStore>,
    tracker: &'a AccessTracker,
    _rank: RankToken,
}

impl<'a> EntitiesRead<'a> {
    pub(crate) fn acquire(lock: &'a RwLock<EntityStore>, tracker: &'a AccessTracker) -> WorldResult<Self> {
        let rank = lock_order::enter(Rank::Entities);
        let store = lock.read().map_err(|_| lock_err("entities.read"))?;
        Ok(Self {
            store,
            tracker,
            _rank: rank,
        })
    }

    /// Entity by id; marks it as accessed.
    pub fn get(&self, id: EntityId) -> WorldResult<&Entity> {
        let entity = self.store.get(id)?;
        self.tracker.touch(id)?;
        Ok(entity)
    }

    /// Returns true if an entity has this id.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.store.contains(id)
    }

    /// Every entity id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<EntityId> {
        self.store.all_ids()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if there are no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub(crate) fn untracked(&self) -> &EntityStore {
        &self.store
    }
}

/// Exclusive access to the entity store.
#[derive(Debug)]
pub struct EntitiesWrite<'a> {
    store: RwLockWriteGuard<'a, EntityStore>,
    tracker: &'a AccessTracker,
    _rank: RankToken,
}

impl<'a> EntitiesWrite<'a> {
    pub(crate) fn acquire(lock: &'a RwLock<EntityStore>, tracker: &'a AccessTracker) -> WorldResult<Self> {
        let rank = lock_order::enter(Rank::Entities);
        let store = lock.write().map_err(|_| lock_err("entities.write"))?;
        Ok(Self {
            store,
            tracker,
            _rank: rank,
        })
    }

    /// Stores `entity` under a fresh id; the new entity counts as accessed.
    pub fn emplace(&mut self, entity: Entity) -> WorldResult<EntityId> {
        let id = self.store.emplace(entity)?;
        self.tracker.touch(id)?;
        Ok(id)
    }

    /// Stores a copy of `entity` under a fresh id.
    pub fn insert_copy(&mut self, entity: &Entity) -> WorldResult<EntityId> {
        self.emplace(entity.clone())
    }

    /// Entity by id; marks it as accessed.
    pub fn get(&self, id: EntityId) -> WorldResult<&Entity> {
        let entity = self.store.get(id)?;
        self.tracker.touch(id)?;
        Ok(entity)
    }

    /// Mutable entity by id; marks it as accessed.
    pub fn get_mut(&mut self, id: EntityId) -> WorldResult<&mut Entity> {
        let entity = self.store.get_mut(id)?;
        self.tracker.touch(id)?;
        Ok(entity)
    }

    /// Returns true if an entity has this id.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.store.contains(id)
    }

    /// Every entity id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<EntityId> {
        self.store.all_ids()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if there are no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The store itself, bypassing access tracking. Used by eviction and
    /// archive export, which must not make entities hot again.
    pub(crate) fn untracked(&mut self) -> &mut EntityStore {
        &mut self.store
    }
}

/// Shared access to the factor store and neighbor index.
#[derive(Debug)]
pub struct FactorsRead<'a> {
    store: RwLockReadGuard<'a, FactorStore>,
    _rank: RankToken,
}

impl<'a> FactorsRead<'a> {
    pub(crate) fn acquire(lock: &'a RwLock<FactorStore>) -> WorldResult<Self> {
        let rank = lock_order::enter(Rank::Factors);
        let store = lock.read().map_err(|_| lock_err("factors.read"))?;
        Ok(Self { store, _rank: rank })
    }

    /// Factor by id.
    pub fn get(&self, id: FactorId) -> WorldResult<&Factor> {
        self.store.get(id)
    }

    /// Every factor id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<FactorId> {
        self.store.all_ids()
    }

    /// Number of factors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if there are no factors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// See [`FactorStore::neighbors`].
    #[must_use]
    pub fn neighbors(&self, id: EntityId) -> BTreeSet<EntityId> {
        self.store.neighbors(id)
    }

    /// See [`FactorStore::connected_factors`].
    #[must_use]
    pub fn connected_factors(&self, id: EntityId) -> Vec<FactorId> {
        self.store.connected_factors(id)
    }
}

/// Exclusive access to the factor store and neighbor index.
#[derive(Debug)]
pub struct FactorsWrite<'a> {
    store: RwLockWriteGuard<'a, FactorStore>,
    _rank: RankToken,
}

impl<'a> FactorsWrite<'a> {
    pub(crate) fn acquire(lock: &'a RwLock<FactorStore>) -> WorldResult<Self> {
        let rank = lock_order::enter(Rank::Factors);
        let store = lock.write().map_err(|_| lock_err("factors.write"))?;
        Ok(Self { store, _rank: rank })
    }

    /// Stores `factor` without checking that its entities exist.
    ///
    /// Prefer [`GraphWrite::factor_emplace`] or
    /// [`WorldModel::factor_emplace`](crate::WorldModel::factor_emplace),
    /// which reject dangling references.
    pub fn emplace_unchecked(&mut self, factor: Factor) -> WorldResult<FactorId> {
        self.store.emplace(factor)
    }

    /// Factor by id.
    pub fn get(&self, id: FactorId) -> WorldResult<&Factor> {
        self.store.get(id)
    }

    /// Mutable factor by id.
    pub fn get_mut(&mut self, id: FactorId) -> WorldResult<&mut Factor> {
        self.store.get_mut(id)
    }

    /// Every factor id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<FactorId> {
        self.store.all_ids()
    }

    /// Number of factors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if there are no factors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// See [`FactorStore::neighbors`].
    #[must_use]
    pub fn neighbors(&self, id: EntityId) -> BTreeSet<EntityId> {
        self.store.neighbors(id)
    }

    pub(crate) fn emplace_checked(&mut self, entities: &EntityStore, factor: Factor) -> WorldResult<FactorId> {
        check_references(entities, &factor)?;
        self.store.emplace(factor)
    }
}

/// Both stores read-locked, entities first.
#[derive(Debug)]
pub struct GraphRead<'a> {
    entities: EntitiesRead<'a>,
    factors: FactorsRead<'a>,
}

impl<'a> GraphRead<'a> {
    pub(crate) fn acquire(
        entities: &'a RwLock<EntityStore>,
        factors: &'a RwLock<FactorStore>,
        tracker: &'a AccessTracker,
    ) -> WorldResult<Self> {
        let entities = EntitiesRead::acquire(entities, tracker)?;
        let factors = FactorsRead::acquire(factors)?;
        Ok(Self { entities, factors })
    }

    /// The entity half.
    #[must_use]
    pub fn entities(&self) -> &EntitiesRead<'a> {
        &self.entities
    }

    /// The factor half.
    #[must_use]
    pub fn factors(&self) -> &FactorsRead<'a> {
        &self.factors
    }
}

/// Both stores write-locked, entities first.
#[derive(Debug)]
pub struct GraphWrite<'a> {
    entities: EntitiesWrite<'a>,
    factors: FactorsWrite<'a>,
}

impl<'a> GraphWrite<'a> {
    pub(crate) fn acquire(
        entities: &'a RwLock<EntityStore>,
        factors: &'a RwLock<FactorStore>,
        tracker: &'a AccessTracker,
    ) -> WorldResult<Self> {
        let entities = EntitiesWrite::acquire(entities, tracker)?;
        let factors = FactorsWrite::acquire(factors)?;
        Ok(Self { entities, factors })
    }

    /// The entity half.
    pub fn entities(&mut self) -> &mut EntitiesWrite<'a> {
        &mut self.entities
    }

    /// The factor half.
    pub fn factors(&mut self) -> &mut FactorsWrite<'a> {
        &mut self.factors
    }

    /// Stores `factor` after checking that every connected entity exists.
    ///
    /// # Errors
    /// - [`WorldModelError::DanglingReference`] for the first unknown entity
    /// - [`WorldModelError::InvalidFactor`] if it connects no entity
    pub fn factor_emplace(&mut self, factor: Factor) -> WorldResult<FactorId> {
        let Self { entities, factors } = self;
        factors.emplace_checked(entities.untracked(), factor)
    }
}
