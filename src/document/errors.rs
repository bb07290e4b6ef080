//! # Document Errors

use thiserror::Error;

use crate::collection::CollectionError;

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Document errors
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    /// A record version other than 1 without a transform to upgrade old records
    #[error("Record version {0} requires a version transform")]
    MissingTransform(i64),

    /// Chunked values are always rewritten whole
    #[error("Partial saves are not supported for chunked documents")]
    ChunkedPartialSave,

    /// Partial update that cannot be applied
    #[error("Invalid partial update: {0}")]
    InvalidPartial(String),

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

impl DocumentError {
    /// Whether the error comes from invalid arguments rather than I/O
    pub fn is_configuration(&self) -> bool {
        match self {
            DocumentError::Collection(e) => e.is_configuration(),
            _ => true,
        }
    }
}
