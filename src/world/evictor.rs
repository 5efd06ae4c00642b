//! Background eviction tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::WorldModel;
use crate::error::WorldResult;

/// Runs [`WorldModel::spin_once`] on a dedicated thread every
/// `spin_period`.
///
/// The thread stops when [`EvictionWorker::shutdown`] is called or the
/// worker is dropped.
#[derive(Debug)]
pub struct EvictionWorker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionWorker {
    /// Spawns the worker thread.
    ///
    /// # Errors
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start(world: Arc<WorldModel>) -> WorldResult<Self> {
        let period = world.config().spin_period();
        Self::start_with_period(world, period)
    }

    /// Spawns the worker thread with an explicit tick period.
    ///
    /// # Errors
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start_with_period(world: Arc<WorldModel>, period: Duration) -> WorldResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("worldmodel-evictor".to_string())
            .spawn(move || run(&world, &stop_rx, period))?;
        info!(
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "eviction worker started"
        );
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the worker.
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("eviction worker panicked");
            }
        }
    }
}

impl Drop for EvictionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(world: &WorldModel, stop_rx: &Receiver<()>, period: Duration) {
    loop {
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => match world.spin_once() {
                Ok(report) if !report.is_empty() => {
                    debug!(unloaded = report.unloaded.len(), failed = report.failed, "eviction tick");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "eviction tick failed"),
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("eviction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, Swappable};
    use crate::config::WorldModelConfig;
    use crate::entity::Entity;
    use crate::storage::InMemoryExternalStore;
    use chrono::Utc;
    use std::time::Instant;

    #[test]
    fn test_worker_unloads_idle_entities() {
        let store = Arc::new(InMemoryExternalStore::new());
        let config = WorldModelConfig {
            age_to_unload_keyframes: 0.01,
            spin_period_ms: 5,
            ..WorldModelConfig::default()
        };
        let world = Arc::new(WorldModel::new(config, store.clone()).unwrap());
        let mut entity = Entity::plain(Utc::now());
        entity.insert_annotation(Annotation::resident("scan", vec![1, 2, 3]));
        let id = world.entity_emplace(entity).unwrap();

        let worker = EvictionWorker::start(Arc::clone(&world)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.write_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.shutdown();

        assert_eq!(store.write_count(), 1);
        world
            .with_entity(id, |e| assert!(e.annotation("scan").unwrap().is_unloaded()))
            .unwrap();
    }

    #[test]
    fn test_shutdown_returns_promptly() {
        let world = Arc::new(WorldModel::in_memory());
        let worker = EvictionWorker::start_with_period(world, Duration::from_secs(60)).unwrap();
        let started = Instant::now();
        worker.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_stops_worker() {
        let world = Arc::new(WorldModel::in_memory());
        {
            let _worker = EvictionWorker::start_with_period(Arc::clone(&world), Duration::from_millis(1)).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(Arc::strong_count(&world), 1);
    }
}
