//! # worldmodel - concurrent entity/factor graph with payload eviction
//!
//! A world model is an in-memory factor graph: entities (plain nodes or
//! keyframes carrying raw sensor observations) connected by factors. Heavy
//! per-entity payloads live in named annotations that can be flushed to an
//! external store and fetched back on demand.
//!
//! ## Core Concepts
//!
//! - **Entity**: a timestamped node with named annotations
//! - **Factor**: a constraint connecting one or more entities
//! - **Neighbor index**: entity -> factors touching it, grown on insertion
//! - **Access tracker**: last access per entity; idle entities get unloaded
//! - **External store**: where unloaded payloads go ([`InMemoryExternalStore`]
//!   or, with the `persistent` feature, a directory on disk)
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use worldmodel::{Annotation, Entity, Factor, InMemoryExternalStore, WorldModel, WorldModelConfig};
//!
//! let store = Arc::new(InMemoryExternalStore::new());
//! let world = WorldModel::new(WorldModelConfig::default(), store.clone()).unwrap();
//!
//! let mut scan = Entity::plain(Utc::now());
//! scan.insert_annotation(Annotation::resident("scan", vec![0u8; 64]));
//! let a = world.entity_emplace(scan).unwrap();
//! let b = world.entity_emplace(Entity::plain(Utc::now())).unwrap();
//! world.factor_emplace(Factor::new("between", vec![a, b], serde_json::Value::Null)).unwrap();
//!
//! world.unload_entity(a).unwrap();
//! assert_eq!(store.write_count(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod annotation;
pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod factor;
pub mod id;
pub mod storage;
pub mod world;

pub use annotation::{Annotation, PayloadState, RawObservation, Swappable};
pub use config::WorldModelConfig;
pub use entity::{Entity, EntityKind, KeyFrame};
pub use error::{WorldModelError, WorldResult};
pub use factor::Factor;
pub use id::{EntityId, FactorId};
pub use storage::{ExternalStore, InMemoryExternalStore};
#[cfg(feature = "persistent")]
pub use storage::DirectoryStore;
pub use world::{
    AccessTracker, EntitiesRead, EntitiesWrite, EvictionWorker, FactorsRead, FactorsWrite, GraphRead, GraphWrite,
    SwapOffReport, WorldModel,
};
