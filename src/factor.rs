//! Graph edges of the world model.
//!
//! A [`Factor`] is a constraint or observation linking one or more entities.
//! The payload is opaque to the store: it is kept as JSON so dataset readers
//! and optimizers can agree on its shape without the store knowing it.

use serde::{Deserialize, Serialize};

use crate::id::{EntityId, FactorId};

/// A constraint between entities.
///
/// # Examples
///
/// ```
/// use worldmodel::{EntityId, Factor};
///
/// let f = Factor::new(
///     "relative_pose3",
///     vec![EntityId::new(0), EntityId::new(1)],
///     serde_json::json!({ "dx": 1.0 }),
/// );
/// assert_eq!(f.connected().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    id: FactorId,
    kind: String,
    connected: Vec<EntityId>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Factor {
    /// Creates a factor with no id yet.
    #[must_use]
    pub fn new(kind: impl Into<String>, connected: Vec<EntityId>, payload: serde_json::Value) -> Self {
        Self {
            id: FactorId::INVALID,
            kind: kind.into(),
            connected,
            payload,
        }
    }

    /// Store-assigned id, [`FactorId::INVALID`] before insertion.
    #[must_use]
    pub const fn id(&self) -> FactorId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: FactorId) {
        self.id = id;
    }

    /// Free-form factor type label.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Entities this factor constrains, in insertion order.
    #[must_use]
    pub fn connected(&self) -> &[EntityId] {
        &self.connected
    }

    /// Factor-specific data.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Mutable factor-specific data. Connectivity cannot be changed.
    pub fn payload_mut(&mut self) -> &mut serde_json::Value {
        &mut self.payload
    }
}
