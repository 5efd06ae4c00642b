//! On-disk payload store tests.
//!
//! These tests verify that:
//! - Unloaded payloads survive a process restart via an archive
//! - Corrupted payload files are detected on load
//! - A second world model cannot share a locked directory

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use tempfile::tempdir;
use worldmodel::storage::open_directory_store;
use worldmodel::{Annotation, Entity, ExternalStore, WorldModel, WorldModelConfig};

fn config_for(dir: &std::path::Path) -> WorldModelConfig {
    WorldModelConfig {
        storage_dir: Some(dir.to_path_buf()),
        sync_on_write: false,
        ..WorldModelConfig::default()
    }
}

#[test]
fn test_archive_survives_reopen() {
    let dir = tempdir().unwrap();
    let payloads = dir.path().join("payloads");
    let archive_path = dir.path().join("map.wmdl");

    let id = {
        let world = WorldModel::open(config_for(&payloads)).unwrap();
        let mut e = Entity::plain(Utc::now());
        e.insert_annotation(Annotation::resident("scan", b"persisted sweep".to_vec()));
        let id = world.entity_emplace(e).unwrap();
        let file = fs::File::create(&archive_path).unwrap();
        world.save_archive(file).unwrap();
        id
    };

    let world = WorldModel::open(config_for(&payloads)).unwrap();
    let ids = world.load_archive(fs::File::open(&archive_path).unwrap()).unwrap();
    assert_eq!(ids, vec![id]);
    world.load_entity(id).unwrap();
    world
        .with_entity(id, |e| {
            assert_eq!(e.annotation("scan").unwrap().payload(), Some(&b"persisted sweep"[..]));
        })
        .unwrap();
}

#[test]
fn test_corrupted_payload_fails_load() {
    let dir = tempdir().unwrap();
    let world = WorldModel::open(config_for(dir.path())).unwrap();
    let mut e = Entity::plain(Utc::now());
    e.insert_annotation(Annotation::resident("scan", vec![5; 128]));
    let id = world.entity_emplace(e).unwrap();
    world.unload_entity(id).unwrap();

    let path = world
        .with_entity(id, |e| e.annotation("scan").unwrap().external_storage().unwrap().to_string())
        .unwrap();
    let file = dir.path().join(&path);
    let mut bytes = fs::read(&file).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&file, bytes).unwrap();

    let err = world.load_entity(id).unwrap_err();
    assert!(err.is_corrupted() || err.is_io(), "unexpected error: {err}");
}

#[test]
fn test_directory_is_exclusive() {
    let dir = tempdir().unwrap();
    let _world = WorldModel::open(config_for(dir.path())).unwrap();
    assert!(WorldModel::open(config_for(dir.path())).is_err());
}

#[test]
fn test_open_requires_storage_dir() {
    let err = WorldModel::open(WorldModelConfig::default()).unwrap_err();
    assert!(err.to_string().contains("storage_dir"));
}

#[test]
fn test_directory_store_shared_through_arc() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn ExternalStore> = Arc::new(open_directory_store(dir.path(), None).unwrap());
    let world = WorldModel::new(WorldModelConfig::default(), Arc::clone(&store)).unwrap();
    let mut e = Entity::plain(Utc::now());
    e.insert_annotation(Annotation::resident("scan", vec![1, 2, 3]));
    let id = world.entity_emplace(e).unwrap();
    world.unload_entity(id).unwrap();

    let path = world
        .with_entity(id, |e| e.annotation("scan").unwrap().external_storage().unwrap().to_string())
        .unwrap();
    assert!(store.contains(&path));
    assert_eq!(store.get(&path).unwrap(), vec![1, 2, 3]);
}
