//! # Store Errors
//!
//! Error types surfaced by store-handle implementations.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    // ==================
    // Connection Errors
    // ==================
    /// Client-level operation attempted before connect
    #[error("Store client is not connected")]
    NotConnected,

    /// URI could not be parsed or names an unknown scheme
    #[error("Invalid store URI: {0}")]
    InvalidUri(String),

    /// The store did not accept the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    // ==================
    // Namespace Errors
    // ==================
    /// Collection already exists
    #[error("Collection already exists: {0}")]
    NamespaceExists(String),

    // ==================
    // Index Errors
    // ==================
    /// Index not found
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// An index with the same name but a different definition exists
    #[error("Index already exists with different options: {0}")]
    IndexOptionsConflict(String),

    /// Unique index violation
    #[error("Duplicate key for index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    // ==================
    // Request Errors
    // ==================
    /// Malformed filter document
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Malformed update document
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Malformed aggregation pipeline
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A bulk write stopped at the given operation
    #[error("Bulk write failed at operation {index}: {message}")]
    BulkWriteFailed { index: usize, message: String },

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether this is the "index not found" outcome of a drop
    pub fn is_index_not_found(&self) -> bool {
        matches!(self, StoreError::IndexNotFound(_))
    }

    /// Whether this is a duplicate collection creation
    pub fn is_namespace_exists(&self) -> bool {
        matches!(self, StoreError::NamespaceExists(_))
    }

    pub(crate) fn poisoned() -> Self {
        StoreError::Internal("Lock poisoned".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StoreError::IndexNotFound("x_1".into()).is_index_not_found());
        assert!(!StoreError::NotConnected.is_index_not_found());
        assert!(StoreError::NamespaceExists("users".into()).is_namespace_exists());
    }

    #[test]
    fn test_bulk_message() {
        let err = StoreError::BulkWriteFailed {
            index: 3,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Bulk write failed at operation 3: boom");
    }
}
