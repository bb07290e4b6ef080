//! # Store Handle
//!
//! The persistence layer talks to a document database through three object
//! safe traits:
//!
//! - [`StoreDriver`] builds a client from a URI and options
//! - [`StoreClient`] is one live connection exposing named collections
//! - [`StoreCollection`] is one collection: find, upsert, delete, indexes,
//!   ordered bulk writes and aggregation
//!
//! Requests use the conventional document-database vocabulary: filters,
//! updates, projections, sorts and pipeline stages are all [`Document`]s.
//! [`memory`] provides an in-process implementation.

pub mod errors;
pub mod fields;
pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod update;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};

use crate::config::ClientOptions;

pub use errors::{StoreError, StoreResult};
pub use memory::{MemoryClient, MemoryCollection, MemoryDriver};

/// A stored record, filter, update or any other request document
pub type Document = Map<String, Value>;

/// Stream of documents produced by an aggregation
pub type DocumentStream = BoxStream<'static, StoreResult<Document>>;

/// Options for `find` / `find_one`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Field projection (`{field: 1}` inclusion or `{field: 0}` exclusion)
    pub projection: Option<Document>,
    /// Sort specification (`{field: 1 | -1}`)
    pub sort: Option<Document>,
    /// Number of matching documents to skip
    pub skip: Option<usize>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Options carrying only a projection
    pub fn projection(projection: Document) -> Self {
        Self {
            projection: Some(projection),
            ..Default::default()
        }
    }

    /// Options carrying only a sort
    pub fn sorted(sort: Document) -> Self {
        Self {
            sort: Some(sort),
            ..Default::default()
        }
    }
}

/// Index creation options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Explicit index name; derived from the keys when absent
    pub name: Option<String>,
    /// Enforce uniqueness of the key tuple
    pub unique: bool,
    /// Expire documents this many seconds after the indexed date
    pub expire_after_seconds: Option<u64>,
}

/// An index to create
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub options: IndexOptions,
}

impl IndexModel {
    /// Create an index model
    pub fn new(keys: Document, options: IndexOptions) -> Self {
        Self { keys, options }
    }

    /// The name the index will be created under
    pub fn name(&self) -> String {
        self.options
            .name
            .clone()
            .unwrap_or_else(|| index_name(&self.keys))
    }
}

/// An existing index as reported by `list_indexes`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub expire_after_seconds: Option<u64>,
}

impl IndexInfo {
    /// Whether the index covers the given field
    pub fn covers(&self, field: &str) -> bool {
        self.keys.contains_key(field)
    }
}

/// Default index name for a key document: `field_1`, `a_1_b_-1`
pub fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}

/// One operation of a bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// Update the first matching document, optionally inserting it
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// Delete the first matching document
    DeleteOne { filter: Document },
    /// Delete every matching document
    DeleteMany { filter: Document },
}

/// Result of a single update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// Result of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub deleted: u64,
}

impl BulkWriteResult {
    pub(crate) fn record_update(&mut self, outcome: UpdateOutcome) {
        self.matched += outcome.matched;
        self.modified += outcome.modified;
        if outcome.upserted {
            self.upserted += 1;
        }
    }
}

/// Builds clients for a URI scheme
pub trait StoreDriver: Send + Sync + fmt::Debug {
    /// Construct a client; must not perform network I/O
    fn client(&self, uri: &str, options: &ClientOptions) -> StoreResult<Arc<dyn StoreClient>>;
}

/// One connection to a document database
#[async_trait]
pub trait StoreClient: Send + Sync + fmt::Debug {
    /// Establish the connection
    async fn connect(&self) -> StoreResult<()>;

    /// Release the connection
    async fn close(&self) -> StoreResult<()>;

    /// Whether `connect` has succeeded and `close` has not been called since
    fn is_connected(&self) -> bool;

    /// Names of the physical collections
    async fn list_collection_names(&self) -> StoreResult<Vec<String>>;

    /// Create a physical collection; fails with `NamespaceExists` when present
    async fn create_collection(&self, name: &str) -> StoreResult<()>;

    /// Handle to a named collection (no I/O)
    fn collection(&self, name: &str) -> Arc<dyn StoreCollection>;
}

/// One named collection of a document database
#[async_trait]
pub trait StoreCollection: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn find_one(&self, filter: &Document, options: FindOptions)
        -> StoreResult<Option<Document>>;

    async fn find(&self, filter: &Document, options: FindOptions) -> StoreResult<Vec<Document>>;

    async fn count(&self, filter: &Document) -> StoreResult<u64>;

    async fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    async fn delete_many(&self, filter: &Document) -> StoreResult<u64>;

    /// Execute the models in one batch; `ordered` stops at the first failure
    async fn bulk_write(&self, models: Vec<WriteModel>, ordered: bool)
        -> StoreResult<BulkWriteResult>;

    /// Create an index and return its name
    async fn create_index(&self, index: &IndexModel) -> StoreResult<String>;

    async fn drop_index(&self, name: &str) -> StoreResult<()>;

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>>;

    /// Drop the physical collection with its indexes
    async fn drop_collection(&self) -> StoreResult<()>;

    async fn aggregate(&self, pipeline: &[Document]) -> StoreResult<DocumentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name(&doc(json!({"_path": 1}))), "_path_1");
        assert_eq!(index_name(&doc(json!({"a": 1, "b": -1}))), "a_1_b_-1");
    }

    #[test]
    fn test_model_name_prefers_explicit() {
        let model = IndexModel::new(
            doc(json!({"_ttl_timestamp": 1})),
            IndexOptions {
                name: Some("ttl".into()),
                ..Default::default()
            },
        );
        assert_eq!(model.name(), "ttl");
    }
}
