//! Last-access bookkeeping for age-based eviction.
//!
//! The tracker has its own mutex, independent of the graph locks, and never
//! takes any other lock while holding it. It only deals in ids and instants.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{lock_err, WorldResult};
use crate::id::EntityId;

/// Last access time per entity.
///
/// An id present means "hot"; an id absent means it was never accessed or
/// has already been reported stale.
#[derive(Debug, Default)]
pub struct AccessTracker {
    last_access: Mutex<HashMap<EntityId, Instant>>,
}

impl AccessTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access to `id` now.
    pub fn touch(&self, id: EntityId) -> WorldResult<()> {
        self.touch_at(id, Instant::now())
    }

    /// Records an access to `id` at `at`.
    pub fn touch_at(&self, id: EntityId, at: Instant) -> WorldResult<()> {
        let mut map = self.last_access.lock().map_err(|_| lock_err("tracker.touch"))?;
        map.insert(id, at);
        Ok(())
    }

    /// Reports every id idle for longer than `max_age` and stops tracking it.
    ///
    /// An id is reported once per idle period: it shows up again only after
    /// another [`Self::touch`] followed by another `max_age` of idleness.
    pub fn find_stale(&self, max_age: Duration) -> WorldResult<Vec<EntityId>> {
        self.find_stale_at(Instant::now(), max_age)
    }

    /// [`Self::find_stale`] evaluated at `now`.
    pub fn find_stale_at(&self, now: Instant, max_age: Duration) -> WorldResult<Vec<EntityId>> {
        let mut map = self.last_access.lock().map_err(|_| lock_err("tracker.find_stale"))?;
        let mut stale: Vec<EntityId> = map
            .iter()
            .filter(|(_, &at)| now.saturating_duration_since(at) > max_age)
            .map(|(&id, _)| id)
            .collect();
        for id in &stale {
            map.remove(id);
        }
        stale.sort_unstable();
        Ok(stale)
    }

    /// Returns true if `id` is currently tracked.
    pub fn is_tracked(&self, id: EntityId) -> WorldResult<bool> {
        let map = self.last_access.lock().map_err(|_| lock_err("tracker.is_tracked"))?;
        Ok(map.contains_key(&id))
    }

    /// Number of tracked ids.
    pub fn len(&self) -> WorldResult<usize> {
        let map = self.last_access.lock().map_err(|_| lock_err("tracker.len"))?;
        Ok(map.len())
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> WorldResult<bool> {
        Ok(self.len()? == 0)
    }
}
