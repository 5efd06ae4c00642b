//! The concurrent world model.
//!
//! [`WorldModel`] owns the entity store, the factor store with its neighbor
//! index, the access tracker and the external payload store. The two graph
//! stores sit behind separate reader-writer locks that are always taken
//! entities first; [`WorldModel::graph_read`] and [`WorldModel::graph_write`]
//! hand out both in that order.
//!
//! # Example
//!
//! ```
//! use worldmodel::{Entity, Factor, WorldModel};
//! use chrono::Utc;
//!
//! let world = WorldModel::in_memory();
//! let a = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
//! let b = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
//! world.factor_emplace(Factor::new("between", vec![a, b], serde_json::Value::Null)).unwrap();
//!
//! assert!(world.entity_neighbors(a).unwrap().contains(&b));
//! ```

mod entities;
mod evictor;
mod factors;
mod guard;
pub(crate) mod lock_order;
mod tracker;

pub use entities::EntityStore;
pub use evictor::EvictionWorker;
pub use factors::{FactorStore, NeighborIndex};
pub use guard::{EntitiesRead, EntitiesWrite, FactorsRead, FactorsWrite, GraphRead, GraphWrite};
pub use tracker::AccessTracker;

use std::collections::{BTreeSet, HashSet};
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::{read_archive, ArchiveWriter};
use crate::config::WorldModelConfig;
use crate::entity::Entity;
use crate::error::{WorldModelError, WorldResult};
use crate::factor::Factor;
use crate::id::{EntityId, FactorId};
use crate::storage::{ExternalStore, InMemoryExternalStore};

/// Outcome of one eviction tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOffReport {
    /// Stale entities that were unloaded, ascending.
    pub unloaded: Vec<EntityId>,
    /// Stale entities whose unload failed. They are not retried.
    pub failed: usize,
}

impl SwapOffReport {
    /// Returns true if the tick found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unloaded.is_empty() && self.failed == 0
    }
}

/// In-memory graph of entities and factors with age-based payload eviction.
#[derive(Debug)]
pub struct WorldModel {
    config: WorldModelConfig,
    entities: RwLock<EntityStore>,
    factors: RwLock<FactorStore>,
    tracker: AccessTracker,
    store: Arc<dyn ExternalStore>,
}

impl WorldModel {
    /// Creates an empty world model flushing payloads into `store`.
    ///
    /// # Errors
    /// [`WorldModelError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: WorldModelConfig, store: Arc<dyn ExternalStore>) -> WorldResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entities: RwLock::new(EntityStore::new()),
            factors: RwLock::new(FactorStore::new()),
            tracker: AccessTracker::new(),
            store,
        })
    }

    /// Creates an empty world model with default settings and an in-memory
    /// payload store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            config: WorldModelConfig::default(),
            entities: RwLock::new(EntityStore::new()),
            factors: RwLock::new(FactorStore::new()),
            tracker: AccessTracker::new(),
            store: Arc::new(InMemoryExternalStore::new()),
        }
    }

    /// Creates an empty world model whose payloads go to the directory named
    /// by `config.storage_dir`.
    ///
    /// # Errors
    /// - [`WorldModelError::InvalidConfig`] if no directory is configured
    /// - If the directory cannot be opened or is locked by another process
    #[cfg(feature = "persistent")]
    pub fn open(config: WorldModelConfig) -> WorldResult<Self> {
        let Some(dir) = config.storage_dir.clone() else {
            return Err(WorldModelError::InvalidConfig {
                reason: "storage_dir is required to open a persistent world model".to_string(),
            });
        };
        let store = crate::storage::open_directory_store(
            &dir,
            Some(crate::storage::PersistentConfig {
                sync_on_write: config.sync_on_write,
            }),
        )?;
        Self::new(config, Arc::new(store))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &WorldModelConfig {
        &self.config
    }

    /// Backend receiving unloaded payloads.
    #[must_use]
    pub fn external_store(&self) -> &Arc<dyn ExternalStore> {
        &self.store
    }

    /// Access bookkeeping used by the eviction tick.
    #[must_use]
    pub const fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    // ----- lock guards -----

    /// Shared lock on the entity store.
    pub fn entities_read(&self) -> WorldResult<EntitiesRead<'_>> {
        EntitiesRead::acquire(&self.entities, &self.tracker)
    }

    /// Exclusive lock on the entity store.
    pub fn entities_write(&self) -> WorldResult<EntitiesWrite<'_>> {
        EntitiesWrite::acquire(&self.entities, &self.tracker)
    }

    /// Shared lock on the factor store.
    pub fn factors_read(&self) -> WorldResult<FactorsRead<'_>> {
        FactorsRead::acquire(&self.factors)
    }

    /// Exclusive lock on the factor store.
    pub fn factors_write(&self) -> WorldResult<FactorsWrite<'_>> {
        FactorsWrite::acquire(&self.factors)
    }

    /// Shared locks on both stores, entities first.
    pub fn graph_read(&self) -> WorldResult<GraphRead<'_>> {
        GraphRead::acquire(&self.entities, &self.factors, &self.tracker)
    }

    /// Exclusive locks on both stores, entities first.
    pub fn graph_write(&self) -> WorldResult<GraphWrite<'_>> {
        GraphWrite::acquire(&self.entities, &self.factors, &self.tracker)
    }

    // ----- producer API -----

    /// Stores `entity` under a fresh id.
    pub fn entity_emplace(&self, entity: Entity) -> WorldResult<EntityId> {
        self.entities_write()?.emplace(entity)
    }

    /// Stores a copy of `entity` under a fresh id.
    pub fn entity_push_back(&self, entity: &Entity) -> WorldResult<EntityId> {
        self.entities_write()?.insert_copy(entity)
    }

    /// Stores `factor` under a fresh id and indexes its entities.
    ///
    /// Holds the entities read lock while inserting, so every connected
    /// entity is known to exist.
    ///
    /// # Errors
    /// - [`WorldModelError::DanglingReference`] for the first unknown entity
    /// - [`WorldModelError::InvalidFactor`] if it connects no entity
    pub fn factor_emplace(&self, factor: Factor) -> WorldResult<FactorId> {
        let entities = self.entities_read()?;
        let mut factors = self.factors_write()?;
        factors.emplace_checked(entities.untracked(), factor)
    }

    /// Stores a copy of `factor`; see [`Self::factor_emplace`].
    pub fn factor_push_back(&self, factor: &Factor) -> WorldResult<FactorId> {
        self.factor_emplace(factor.clone())
    }

    /// Runs `f` on the entity with this id.
    pub fn with_entity<R>(&self, id: EntityId, f: impl FnOnce(&Entity) -> R) -> WorldResult<R> {
        let entities = self.entities_read()?;
        Ok(f(entities.get(id)?))
    }

    /// Runs `f` on the entity with this id, mutably.
    pub fn with_entity_mut<R>(&self, id: EntityId, f: impl FnOnce(&mut Entity) -> R) -> WorldResult<R> {
        let mut entities = self.entities_write()?;
        Ok(f(entities.get_mut(id)?))
    }

    /// Runs `f` on the factor with this id.
    pub fn with_factor<R>(&self, id: FactorId, f: impl FnOnce(&Factor) -> R) -> WorldResult<R> {
        let factors = self.factors_read()?;
        Ok(f(factors.get(id)?))
    }

    /// Every entity id, ascending.
    pub fn entity_all_ids(&self) -> WorldResult<Vec<EntityId>> {
        Ok(self.entities_read()?.all_ids())
    }

    /// Every factor id, ascending.
    pub fn factor_all_ids(&self) -> WorldResult<Vec<FactorId>> {
        Ok(self.factors_read()?.all_ids())
    }

    /// Entities sharing at least one factor with `id`, excluding `id`.
    ///
    /// An id no factor touches has no neighbors; this is not an error.
    pub fn entity_neighbors(&self, id: EntityId) -> WorldResult<BTreeSet<EntityId>> {
        Ok(self.factors_read()?.neighbors(id))
    }

    /// Annotation names of the entity, sorted.
    pub fn entity_annotation_names(&self, id: EntityId) -> WorldResult<Vec<String>> {
        self.with_entity(id, |entity| {
            let mut names: Vec<String> = entity.annotations().keys().cloned().collect();
            names.sort_unstable();
            names
        })
    }

    // ----- lifecycle -----

    /// Brings the entity's annotation payloads back into memory.
    pub fn load_entity(&self, id: EntityId) -> WorldResult<()> {
        let mut entities = self.entities_write()?;
        entities.get_mut(id)?.load(self.store.as_ref())
    }

    /// Flushes the entity's payloads to external storage and drops them from
    /// memory.
    pub fn unload_entity(&self, id: EntityId) -> WorldResult<()> {
        let mut entities = self.entities_write()?;
        entities.get_mut(id)?.unload(self.store.as_ref())
    }

    /// One eviction tick: unloads every entity idle for longer than the
    /// configured age.
    ///
    /// Each stale id is reported by the tracker once; a failed unload is
    /// logged and counted but not retried.
    pub fn spin_once(&self) -> WorldResult<SwapOffReport> {
        self.spin_once_at(Instant::now())
    }

    /// [`Self::spin_once`] evaluated at `now`.
    pub fn spin_once_at(&self, now: Instant) -> WorldResult<SwapOffReport> {
        let stale = self.tracker.find_stale_at(now, self.config.max_idle_age())?;
        self.unload_stale(stale)
    }

    /// Unloads `stale` under one entities write lock.
    ///
    /// The stale scan runs before the lock is taken, so a reader can touch
    /// an id in between. Such an id is tracked again and is left resident.
    fn unload_stale(&self, stale: Vec<EntityId>) -> WorldResult<SwapOffReport> {
        let mut report = SwapOffReport::default();
        if stale.is_empty() {
            return Ok(report);
        }

        let mut entities = self.entities_write()?;
        let store = entities.untracked();
        for id in stale {
            if self.tracker.is_tracked(id)? {
                debug!(entity_id = %id, "stale entity was accessed again, keeping it");
                continue;
            }
            match store.get_mut(id).and_then(|e| e.unload(self.store.as_ref())) {
                Ok(()) => {
                    debug!(entity_id = %id, "unloaded stale entity");
                    report.unloaded.push(id);
                }
                Err(err) => {
                    warn!(entity_id = %id, error = %err, "failed to unload stale entity");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // ----- archive -----

    /// Writes every entity to `sink` as an archive and returns the count.
    ///
    /// Flush-then-export: each annotation is unloaded to external storage
    /// before its path is written. Access times are not refreshed.
    pub fn save_archive<W: Write>(&self, sink: W) -> WorldResult<usize> {
        let mut entities = self.entities_write()?;
        let store = entities.untracked();
        let count = store.len();
        let mut writer = ArchiveWriter::new(sink, count as u64)?;
        for entity in store.iter_mut() {
            writer.append(entity, self.store.as_ref())?;
        }
        let mut sink = writer.finish()?;
        sink.flush()?;
        info!(entities = count, "saved archive");
        Ok(count)
    }

    /// Imports every entity of an archive, keeping their ids.
    ///
    /// The import is all-or-nothing: the archive is fully decoded and every
    /// id checked against the store before anything is inserted.
    ///
    /// # Errors
    /// - [`WorldModelError::CorruptedData`] for a malformed archive, the
    ///   invalid id, a repeated id, or an id already present in the store
    pub fn load_archive<R: Read>(&self, mut source: R) -> WorldResult<Vec<EntityId>> {
        let decoded = read_archive(&mut source)?;

        let mut entities = self.entities_write()?;
        let store = entities.untracked();
        let mut seen = HashSet::with_capacity(decoded.len());
        for entity in &decoded {
            let id = entity.id();
            store.check_restorable(id)?;
            if !seen.insert(id) {
                return Err(WorldModelError::corrupted(format!("archive repeats entity {id}")));
            }
        }

        let mut ids = Vec::with_capacity(decoded.len());
        for entity in decoded {
            ids.push(store.restore(entity)?);
        }
        info!(entities = ids.len(), "loaded archive");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, RawObservation};
    use crate::storage::FailingExternalStore;
    use chrono::Utc;
    use std::time::Duration;

    fn world_with(store: &Arc<InMemoryExternalStore>) -> WorldModel {
        WorldModel::new(WorldModelConfig::default(), store.clone()).unwrap()
    }

    fn scanned(bytes: &[u8]) -> Entity {
        let mut e = Entity::plain(Utc::now());
        e.insert_annotation(Annotation::resident("scan", bytes.to_vec()));
        e
    }

    /// A well-formed archive holding plain entities with the given raw ids.
    fn archive_with_ids(raw_ids: &[u64]) -> Vec<u8> {
        let store = InMemoryExternalStore::new();
        let mut writer = ArchiveWriter::new(Vec::new(), raw_ids.len() as u64).unwrap();
        for &raw in raw_ids {
            let mut e = Entity::plain(Utc::now());
            e.set_id(EntityId::new(raw));
            writer.append(&mut e, &store).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = WorldModelConfig {
            spin_period_ms: 0,
            ..WorldModelConfig::default()
        };
        let err = WorldModel::new(config, Arc::new(InMemoryExternalStore::new())).unwrap_err();
        assert!(matches!(err, WorldModelError::InvalidConfig { .. }));
    }

    #[test]
    fn test_emplace_and_lookup() {
        let world = WorldModel::in_memory();
        let id = world.entity_emplace(scanned(b"abc")).unwrap();
        let copy = world.entity_push_back(&scanned(b"def")).unwrap();
        assert_ne!(id, copy);
        assert_eq!(world.entity_all_ids().unwrap(), vec![id, copy]);
        assert_eq!(world.entity_annotation_names(id).unwrap(), vec!["scan".to_string()]);
        assert_eq!(world.with_entity(id, Entity::id).unwrap(), id);
        assert!(world.with_entity(EntityId::new(99), |_| ()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_factor_emplace_validates_references() {
        let world = WorldModel::in_memory();
        let a = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
        let err = world
            .factor_emplace(Factor::new("between", vec![a, EntityId::new(7)], serde_json::Value::Null))
            .unwrap_err();
        assert!(matches!(err, WorldModelError::DanglingReference { .. }));
        assert!(world.factor_all_ids().unwrap().is_empty());
        assert!(world.entity_neighbors(a).unwrap().is_empty());
    }

    #[test]
    fn test_factor_push_back_and_with_factor() {
        let world = WorldModel::in_memory();
        let a = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
        let b = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
        let factor = Factor::new("between", vec![a, b], serde_json::json!({"dx": 1.0}));
        let f = world.factor_push_back(&factor).unwrap();
        assert_eq!(world.with_factor(f, |f| f.kind().to_string()).unwrap(), "between");
        assert_eq!(world.entity_neighbors(b).unwrap(), BTreeSet::from([a]));
    }

    #[test]
    fn test_spin_once_unloads_only_stale() {
        let store = Arc::new(InMemoryExternalStore::new());
        let world = world_with(&store);
        let old = world.entity_emplace(scanned(b"old")).unwrap();
        let t0 = Instant::now();
        let fresh = world.entity_emplace(scanned(b"fresh")).unwrap();
        world.tracker().touch_at(old, t0).unwrap();
        world.tracker().touch_at(fresh, t0 + Duration::from_secs(10)).unwrap();

        let report = world.spin_once_at(t0 + Duration::from_secs(20)).unwrap();
        assert_eq!(report.unloaded, vec![old]);
        assert_eq!(report.failed, 0);
        assert_eq!(store.write_count(), 1);

        let again = world.spin_once_at(t0 + Duration::from_secs(20)).unwrap();
        assert!(again.is_empty());

        let entities = world.entities_read().unwrap();
        assert!(entities.get(old).unwrap().is_unloaded());
        assert!(!entities.get(fresh).unwrap().is_unloaded());
    }

    #[test]
    fn test_spin_once_counts_failed_unload_once() {
        let store = Arc::new(FailingExternalStore::fail_after(0));
        let world = WorldModel::new(WorldModelConfig::default(), store.clone()).unwrap();
        let id = world.entity_emplace(scanned(b"stuck")).unwrap();
        let t0 = Instant::now();
        world.tracker().touch_at(id, t0).unwrap();

        let report = world.spin_once_at(t0 + Duration::from_secs(60)).unwrap();
        assert!(report.unloaded.is_empty());
        assert_eq!(report.failed, 1);

        // Not retried on the next tick.
        assert!(world.spin_once_at(t0 + Duration::from_secs(120)).unwrap().is_empty());
        assert_eq!(store.write_count(), 0);
        world
            .with_entity(id, |e| assert_eq!(e.annotation("scan").unwrap().payload(), Some(&b"stuck"[..])))
            .unwrap();
    }

    #[test]
    fn test_entity_accessed_after_stale_scan_stays_resident() {
        let store = Arc::new(InMemoryExternalStore::new());
        let world = world_with(&store);
        let id = world.entity_emplace(scanned(b"busy")).unwrap();
        let t0 = Instant::now();
        world.tracker().touch_at(id, t0).unwrap();

        let stale = world
            .tracker()
            .find_stale_at(t0 + Duration::from_secs(60), world.config.max_idle_age())
            .unwrap();
        assert_eq!(stale, vec![id]);
        // A reader gets in before the eviction takes the write lock.
        world.with_entity(id, |_| ()).unwrap();

        let report = world.unload_stale(stale).unwrap();
        assert!(report.is_empty());
        assert_eq!(store.write_count(), 0);
        assert!(!world.entities_read().unwrap().get(id).unwrap().is_unloaded());
    }

    #[test]
    fn test_spin_once_releases_keyframe_observations() {
        let world = WorldModel::in_memory();
        let kf = Entity::keyframe(Utc::now(), vec![RawObservation::new("cam0", vec![9; 16])]);
        let id = world.entity_emplace(kf).unwrap();
        let t0 = Instant::now();
        world.tracker().touch_at(id, t0).unwrap();

        world.spin_once_at(t0 + Duration::from_secs(60)).unwrap();
        world
            .with_entity(id, |e| assert!(!e.as_keyframe().unwrap().has_raw_observations()))
            .unwrap();
    }

    #[test]
    fn test_load_and_unload_entity() {
        let world = WorldModel::in_memory();
        let id = world.entity_emplace(scanned(b"payload")).unwrap();
        world.unload_entity(id).unwrap();
        world
            .with_entity(id, |e| assert!(e.annotation("scan").unwrap().payload().is_none()))
            .unwrap();
        world.load_entity(id).unwrap();
        world
            .with_entity(id, |e| assert_eq!(e.annotation("scan").unwrap().payload(), Some(&b"payload"[..])))
            .unwrap();
    }

    #[test]
    fn test_archive_roundtrip_between_worlds() {
        let store = Arc::new(InMemoryExternalStore::new());
        let source = world_with(&store);
        let a = source.entity_emplace(scanned(b"a")).unwrap();
        let kf = source
            .entity_emplace(Entity::keyframe(Utc::now(), vec![RawObservation::new("cam0", vec![1])]))
            .unwrap();

        let mut buf = Vec::new();
        assert_eq!(source.save_archive(&mut buf).unwrap(), 2);

        let target = world_with(&store);
        let ids = target.load_archive(buf.as_slice()).unwrap();
        assert_eq!(ids, vec![a, kf]);
        target.load_entity(a).unwrap();
        target
            .with_entity(a, |e| assert_eq!(e.annotation("scan").unwrap().payload(), Some(&b"a"[..])))
            .unwrap();
        target
            .with_entity(kf, |e| assert!(e.as_keyframe().is_some()))
            .unwrap();

        let next = target.entity_emplace(Entity::plain(Utc::now())).unwrap();
        assert!(next > kf);
    }

    #[test]
    fn test_load_archive_is_all_or_nothing() {
        let world = WorldModel::in_memory();
        world.entity_emplace(Entity::plain(Utc::now())).unwrap();
        world.entity_emplace(Entity::plain(Utc::now())).unwrap();
        let mut buf = Vec::new();
        world.save_archive(&mut buf).unwrap();

        let target = WorldModel::in_memory();
        target.entity_emplace(Entity::plain(Utc::now())).unwrap();
        assert!(target.load_archive(buf.as_slice()).unwrap_err().is_corrupted());
        assert_eq!(target.entity_all_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_load_archive_rejects_invalid_id_without_inserting() {
        let buf = archive_with_ids(&[3, u64::MAX]);
        let world = WorldModel::in_memory();
        let err = world.load_archive(buf.as_slice()).unwrap_err();
        assert!(err.is_corrupted(), "unexpected error: {err}");
        assert!(world.entity_all_ids().unwrap().is_empty());
        assert_eq!(world.entity_emplace(Entity::plain(Utc::now())).unwrap(), EntityId::new(0));
    }

    #[test]
    fn test_load_archive_rejects_repeated_id() {
        let buf = archive_with_ids(&[4, 4]);
        let world = WorldModel::in_memory();
        assert!(world.load_archive(buf.as_slice()).unwrap_err().is_corrupted());
        assert!(world.entity_all_ids().unwrap().is_empty());
    }

    #[test]
    fn test_archive_with_last_id_exhausts_ids() {
        let buf = archive_with_ids(&[u64::MAX - 1]);
        let world = WorldModel::in_memory();
        assert_eq!(world.load_archive(buf.as_slice()).unwrap(), vec![EntityId::new(u64::MAX - 1)]);

        let err = world.entity_emplace(Entity::plain(Utc::now())).unwrap_err();
        assert!(matches!(err, WorldModelError::IdSpaceExhausted));
        assert_eq!(world.entity_all_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_graph_guards_nest_in_order() {
        let world = WorldModel::in_memory();
        let mut graph = world.graph_write().unwrap();
        let a = graph.entities().emplace(Entity::plain(Utc::now())).unwrap();
        let b = graph.entities().emplace(Entity::plain(Utc::now())).unwrap();
        graph
            .factor_emplace(Factor::new("between", vec![a, b], serde_json::Value::Null))
            .unwrap();
        drop(graph);

        let graph = world.graph_read().unwrap();
        assert_eq!(graph.factors().neighbors(a), BTreeSet::from([b]));
        assert_eq!(graph.entities().len(), 2);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order violation")]
    fn test_entities_after_factors_panics() {
        let world = WorldModel::in_memory();
        let _factors = world.factors_read().unwrap();
        let _entities = world.entities_read();
    }
}
