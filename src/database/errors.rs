//! # Database Errors

use thiserror::Error;

use crate::store::StoreError;

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The driver could not build a client from the URI and options
    #[error("Failed to create the store client: {0}")]
    ClientBuild(StoreError),

    /// No client has been built yet (`initialize` not called, or closed)
    #[error("Database is not initialized")]
    NotInitialized,

    /// Connecting failed; the cause is logged
    #[error("Failed to connect to the database")]
    ConnectionFailed,

    /// `unique` registration of a name that is already registered
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// Store failure outside of connect
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            DatabaseError::CollectionExists("users".into()).to_string(),
            "Collection already exists: users"
        );
        assert_eq!(
            DatabaseError::ConnectionFailed.to_string(),
            "Failed to connect to the database"
        );
    }
}
