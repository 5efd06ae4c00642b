//! Identity-indexed factor container and the neighbor index.
//!
//! The neighbor index lives next to the factors so that inserting a factor
//! and indexing it happen under the same write lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{WorldModelError, WorldResult};
use crate::factor::Factor;
use crate::id::{EntityId, FactorId, IdAllocator};

/// Entity id -> ids of the factors touching it. Only ever grows.
#[derive(Debug, Default)]
pub struct NeighborIndex {
    by_entity: HashMap<EntityId, HashSet<FactorId>>,
}

impl NeighborIndex {
    fn record(&mut self, factor: &Factor) {
        for &entity in factor.connected() {
            self.by_entity.entry(entity).or_default().insert(factor.id());
        }
    }

    /// Factors touching `entity`.
    #[must_use]
    pub fn factors_of(&self, entity: EntityId) -> Option<&HashSet<FactorId>> {
        self.by_entity.get(&entity)
    }
}

/// All factors of a world model, keyed by id.
#[derive(Debug, Default)]
pub struct FactorStore {
    by_id: BTreeMap<FactorId, Factor>,
    ids: IdAllocator,
    neighbors: NeighborIndex,
}

impl FactorStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `factor`, assigns a fresh id and indexes it under
    /// every entity it connects.
    ///
    /// Referenced entities are not checked here; use
    /// [`WorldModel::factor_emplace`](crate::WorldModel::factor_emplace) for
    /// validated insertion.
    ///
    /// # Errors
    /// - [`WorldModelError::InvalidFactor`] if the factor connects no entity
    /// - [`WorldModelError::IdSpaceExhausted`] if no id is left to assign
    pub fn emplace(&mut self, mut factor: Factor) -> WorldResult<FactorId> {
        if factor.connected().is_empty() {
            return Err(WorldModelError::InvalidFactor {
                reason: format!("factor of kind '{}' connects no entity", factor.kind()),
            });
        }
        let id = FactorId::new(self.ids.issue()?);
        factor.set_id(id);
        self.neighbors.record(&factor);
        self.by_id.insert(id, factor);
        Ok(id)
    }

    /// Stores a copy of `factor` under a fresh id.
    pub fn insert_copy(&mut self, factor: &Factor) -> WorldResult<FactorId> {
        self.emplace(factor.clone())
    }

    /// Factor by id.
    ///
    /// # Errors
    /// [`WorldModelError::FactorNotFound`] if no factor has this id.
    pub fn get(&self, id: FactorId) -> WorldResult<&Factor> {
        self.by_id.get(&id).ok_or(WorldModelError::FactorNotFound { id })
    }

    /// Mutable factor by id.
    ///
    /// # Errors
    /// [`WorldModelError::FactorNotFound`] if no factor has this id.
    pub fn get_mut(&mut self, id: FactorId) -> WorldResult<&mut Factor> {
        self.by_id.get_mut(&id).ok_or(WorldModelError::FactorNotFound { id })
    }

    /// Every stored id, ascending.
    #[must_use]
    pub fn all_ids(&self) -> Vec<FactorId> {
        self.by_id.keys().copied().collect()
    }

    /// Number of stored factors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if no factor is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Factors touching `entity`, empty if none.
    #[must_use]
    pub fn connected_factors(&self, entity: EntityId) -> Vec<FactorId> {
        let mut ids: Vec<_> = self
            .neighbors
            .factors_of(entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Every entity sharing at least one factor with `entity`, never
    /// `entity` itself.
    #[must_use]
    pub fn neighbors(&self, entity: EntityId) -> BTreeSet<EntityId> {
        let Some(factors) = self.neighbors.factors_of(entity) else {
            return BTreeSet::new();
        };
        factors
            .iter()
            .filter_map(|fid| self.by_id.get(fid))
            .flat_map(|f| f.connected().iter().copied())
            .filter(|&other| other != entity)
            .collect()
    }
}
