//! Stable identifiers for entities and factors.
//!
//! Ids are dense integers issued by the owning store in insertion order.
//! Once assigned, an id never changes and is never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{WorldModelError, WorldResult};

/// Identifier of an entity in the world model.
///
/// # Examples
///
/// ```
/// use worldmodel::EntityId;
///
/// let id = EntityId::new(42);
/// assert_eq!(id.get(), 42);
/// assert!(id.is_valid());
/// assert!(!EntityId::INVALID.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

/// Identifier of a factor in the world model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorId(u64);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            /// Sentinel for an object that has not been stored yet.
            pub const INVALID: Self = Self(u64::MAX);

            /// Wraps a raw id value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns false for the [`Self::INVALID`] sentinel.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != u64::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}", self.0)
                } else {
                    write!(f, "invalid")
                }
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

impl_id!(EntityId);
impl_id!(FactorId);

/// Monotonic id issuer owned by a store.
///
/// Not synchronized: it lives inside a container that is only mutated under
/// that container's write lock.
#[derive(Debug, Default, Clone)]
pub(crate) struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Issues the next id.
    ///
    /// # Errors
    /// [`WorldModelError::IdSpaceExhausted`] once every id below the
    /// `INVALID` sentinel has been handed out or reserved.
    pub(crate) fn issue(&mut self) -> WorldResult<u64> {
        let id = self.next;
        if id == u64::MAX {
            return Err(WorldModelError::IdSpaceExhausted);
        }
        self.next = id + 1;
        Ok(id)
    }

    /// Makes sure ids at or below `raw` are never issued again.
    ///
    /// Used when restoring entities that already carry an id.
    pub(crate) fn reserve(&mut self, raw: u64) {
        if raw != u64::MAX && raw >= self.next {
            self.next = raw + 1;
        }
    }
}
