//! # Shared Error Types
//!
//! The persistence error taxonomy every subsystem sees. Component-specific
//! errors (crypto, bus, pipeline) live in their own crates.

use thiserror::Error;

/// Errors from the persistence layer.
///
/// Retries for `Timeout` and `Io` are the caller's responsibility; the store
/// itself never retries.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Conflict: {what}")]
    Conflict { what: String },

    /// The requested record does not exist.
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// A referential constraint was violated.
    #[error("Integrity violation: {message}")]
    Integrity { message: String },

    /// The operation exceeded its deadline.
    #[error("Timeout during {operation}")]
    Timeout { operation: String },

    /// The underlying adapter failed.
    #[error("Storage I/O error: {message}")]
    Io { message: String },
}

impl StoreError {
    /// Shorthand for a `NotFound` with a displayable id.
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Io {
            message: "disk".into()
        }
        .is_transient());
        assert!(StoreError::Timeout {
            operation: "read".into()
        }
        .is_transient());
        assert!(!StoreError::not_found("mandate", "abc").is_transient());
        assert!(!StoreError::Conflict {
            what: "producer_seq".into()
        }
        .is_transient());
    }
}
