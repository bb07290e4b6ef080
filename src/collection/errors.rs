//! # Collection Errors
//!
//! Configuration errors are returned as-is. Store and codec failures are
//! logged where they happen and surfaced as [`CollectionError::Operation`],
//! which names the operation and collection but not the store's own error
//! shape.

use std::fmt;

use thiserror::Error;

use crate::codec::CodecError;
use crate::database::DatabaseError;
use crate::store::StoreError;

/// Result type for collection operations
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Public collection operations, used to scope surfaced errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Load,
    Save,
    Update,
    BulkWrite,
    Delete,
    Drop,
    List,
    Count,
    Aggregate,
    Index,
}

impl Operation {
    /// Get the operation description
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Init => "initializing the collection",
            Operation::Load => "loading the document",
            Operation::Save => "saving the document",
            Operation::Update => "updating the document",
            Operation::BulkWrite => "executing the bulk write",
            Operation::Delete => "deleting documents",
            Operation::Drop => "dropping the collection",
            Operation::List => "listing documents",
            Operation::Count => "counting documents",
            Operation::Aggregate => "running the aggregation",
            Operation::Index => "creating the index",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collection errors
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    // ==================
    // Configuration Errors
    // ==================
    /// Query argument is neither a path string nor a filter object
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Delete by an empty filter would wipe the collection
    #[error("Refusing to delete with an empty query")]
    EmptyDeleteQuery,

    /// Index declaration without `key` or `keys`
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// Conflicting or unsupported option combination
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    // ==================
    // Lifecycle Errors
    // ==================
    /// Store handle accessed before initialization
    #[error("Collection '{0}' is not initialized")]
    NotInitialized(String),

    /// The database connection could not be established
    #[error("{0}")]
    Connection(#[from] DatabaseError),

    // ==================
    // Operation Errors
    // ==================
    /// A store or codec failure, scoped to the operation
    #[error("Error while {operation} (collection '{collection}')")]
    Operation {
        operation: Operation,
        collection: String,
    },

    /// Raw store failure, converted to `Operation` before leaving the collection
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Raw codec failure, converted to `Operation` before leaving the collection
    #[error("{0}")]
    Codec(#[from] CodecError),
}

impl CollectionError {
    /// Whether the error comes from invalid arguments rather than I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CollectionError::InvalidQuery(_)
                | CollectionError::EmptyDeleteQuery
                | CollectionError::InvalidIndex(_)
                | CollectionError::InvalidOptions(_)
        )
    }

    /// The operation a surfaced error belongs to
    pub fn operation(&self) -> Option<Operation> {
        match self {
            CollectionError::Operation { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
