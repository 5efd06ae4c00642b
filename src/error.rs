//! Error types for the world model.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions (a missing id, a corrupted record, a failed flush)
//! instead of parsing messages.

use thiserror::Error;

use crate::id::{EntityId, FactorId};

/// Top-level error type for world model operations.
#[derive(Debug, Error)]
pub enum WorldModelError {
    /// No entity is stored under the id.
    #[error("Entity not found: {id}")]
    EntityNotFound {
        /// The id that was looked up.
        id: EntityId,
    },

    /// No factor is stored under the id.
    #[error("Factor not found: {id}")]
    FactorNotFound {
        /// The id that was looked up.
        id: FactorId,
    },

    /// The factor cannot be stored as given.
    #[error("Invalid factor: {reason}")]
    InvalidFactor {
        /// What is wrong with the factor.
        reason: String,
    },

    /// A factor connects an entity that is not in the store.
    #[error("Factor references unknown entity {id}")]
    DanglingReference {
        /// The missing entity.
        id: EntityId,
    },

    /// A record, payload or archive failed to decode.
    #[error("Corrupted data: {reason}")]
    CorruptedData {
        /// Where decoding went wrong.
        reason: String,
    },

    /// The external store or a stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation exists but has no implementation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// The refused operation.
        operation: String,
    },

    /// An annotation marked external has no recorded path.
    #[error("Annotation '{name}' has no external storage path")]
    MissingExternalPath {
        /// Name of the annotation.
        name: String,
    },

    /// A thread panicked while holding one of the world model's locks.
    #[error("Poisoned lock: {context}")]
    LockPoisoned {
        /// The lock and the access that found it poisoned.
        context: &'static str,
    },

    /// A configuration value is out of range or missing.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// The offending setting.
        reason: String,
    },

    /// Every id below the `INVALID` sentinel is in use.
    #[error("Id space exhausted")]
    IdSpaceExhausted,
}

impl WorldModelError {
    /// Creates a corrupted-data error.
    #[must_use]
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::CorruptedData {
            reason: reason.into(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Returns true if this is a lookup failure for an entity or factor.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. } | Self::FactorNotFound { .. })
    }

    /// Returns true if a serialized stream could not be decoded.
    #[must_use]
    pub const fn is_corrupted(&self) -> bool {
        matches!(self, Self::CorruptedData { .. })
    }

    /// Returns true if this error came from the underlying storage I/O.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type alias for world model operations.
pub type WorldResult<T> = Result<T, WorldModelError>;

pub(crate) fn lock_err(context: &'static str) -> WorldModelError {
    WorldModelError::LockPoisoned { context }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_not_found_display() {
        let err = WorldModelError::EntityNotFound { id: EntityId::new(7) };
        let msg = format!("{err}");
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains('7'));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_factor_not_found_is_not_found() {
        let err = WorldModelError::FactorNotFound { id: FactorId::new(3) };
        assert!(err.is_not_found());
        assert!(!err.is_corrupted());
    }

    #[test]
    fn test_corrupted_helper() {
        let err = WorldModelError::corrupted("truncated annotation name");
        assert!(err.is_corrupted());
        assert!(err.to_string().contains("truncated annotation name"));
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let err: WorldModelError = io.into();
        assert!(err.is_io());
        assert!(err.to_string().contains("read-only volume"));
    }

    #[test]
    fn test_unsupported_and_lock() {
        let err = WorldModelError::unsupported("reload raw observations");
        assert!(err.to_string().contains("reload raw observations"));

        let err = lock_err("entities.read");
        assert!(err.to_string().contains("entities.read"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_id_space_exhausted_display() {
        let err = WorldModelError::IdSpaceExhausted;
        assert!(err.to_string().contains("exhausted"));
        assert!(!err.is_corrupted());
    }
}
