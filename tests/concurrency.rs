//! Concurrent access tests.
//!
//! Readers never see a half-written entity, writers exclude readers, and
//! the eviction tick runs alongside producers without deadlocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use worldmodel::{Annotation, Entity, EntityId, EvictionWorker, Factor, WorldModel, WorldModelConfig};

use worldmodel::InMemoryExternalStore;

const READERS: usize = 4;

fn tagged(tag: u8) -> Entity {
    let mut e = Entity::plain(Utc::now());
    e.insert_annotation(Annotation::resident("a", vec![tag; 64]));
    e.insert_annotation(Annotation::resident("b", vec![tag; 64]));
    e
}

/// A writer rewrites both annotations under one write guard; readers must
/// always observe them in agreement.
#[test]
fn test_readers_never_see_torn_entities() {
    let world = Arc::new(WorldModel::in_memory());
    let id = world.entity_emplace(tagged(0)).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let world = Arc::clone(&world);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0usize;
                while !done.load(Ordering::Acquire) {
                    world
                        .with_entity(id, |e| {
                            let a = e.annotation("a").unwrap().payload().unwrap();
                            let b = e.annotation("b").unwrap().payload().unwrap();
                            assert_eq!(a, b, "torn entity observed");
                        })
                        .unwrap();
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for tag in 1..=200u8 {
        world
            .with_entity_mut(id, |e| {
                e.insert_annotation(Annotation::resident("a", vec![tag; 64]));
                e.insert_annotation(Annotation::resident("b", vec![tag; 64]));
            })
            .unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}

/// While a write guard is held no reader makes progress.
#[test]
fn test_writer_blocks_readers() {
    let world = Arc::new(WorldModel::in_memory());
    let id = world.entity_emplace(tagged(1)).unwrap();
    let started = Arc::new(Barrier::new(2));
    let read_done = Arc::new(AtomicBool::new(false));

    let guard = world.entities_write().unwrap();
    let reader = {
        let world = Arc::clone(&world);
        let started = Arc::clone(&started);
        let read_done = Arc::clone(&read_done);
        thread::spawn(move || {
            started.wait();
            world.with_entity(id, |_| ()).unwrap();
            read_done.store(true, Ordering::Release);
        })
    };

    started.wait();
    thread::sleep(Duration::from_millis(50));
    assert!(!read_done.load(Ordering::Acquire));
    drop(guard);

    reader.join().unwrap();
    assert!(read_done.load(Ordering::Acquire));
}

/// Producers add entities and factors while the eviction worker ticks.
#[test]
fn test_producers_alongside_eviction_worker() {
    let config = WorldModelConfig {
        age_to_unload_keyframes: 0.001,
        spin_period_ms: 1,
        ..WorldModelConfig::default()
    };
    let store = Arc::new(InMemoryExternalStore::new());
    let world = Arc::new(WorldModel::new(config, store.clone()).unwrap());
    let worker = EvictionWorker::start(Arc::clone(&world)).unwrap();

    let producers: Vec<_> = (0..3)
        .map(|_| {
            let world = Arc::clone(&world);
            thread::spawn(move || {
                let mut previous: Option<EntityId> = None;
                for i in 0..50u8 {
                    let id = world.entity_emplace(tagged(i)).unwrap();
                    if let Some(prev) = previous {
                        world
                            .factor_emplace(Factor::new("odometry", vec![prev, id], serde_json::Value::Null))
                            .unwrap();
                        world.entity_neighbors(id).unwrap();
                    }
                    previous = Some(id);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    worker.shutdown();

    assert_eq!(world.entity_all_ids().unwrap().len(), 150);
    assert_eq!(world.factor_all_ids().unwrap().len(), 147);

    let graph = world.graph_read().unwrap();
    for id in graph.entities().all_ids() {
        for neighbor in graph.factors().neighbors(id) {
            assert!(graph.entities().contains(neighbor));
        }
    }
}
