//! chunkstore - Collections and documents over a document database
//!
//! Path addressed documents, transparent chunking of large values, TTL index
//! reconciliation and versioned document references.

pub mod codec;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod merge;
pub mod observability;
pub mod single_flight;
pub mod store;

pub use collection::{Collection, CollectionError, CollectionOptions, Query};
pub use config::{ClientOptions, DatabaseConfig, LogConfig};
pub use database::{Database, DatabaseError};
pub use document::{Document, DocumentError, DocumentMut, DocumentRef, DocumentView};
pub use store::{MemoryDriver, StoreCollection, StoreDriver};
