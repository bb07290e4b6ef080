//! Option and result types for collection operations

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::errors::{CollectionError, CollectionResult};
use crate::store::{
    Document, DocumentStream, IndexModel, IndexOptions, StoreCollection, UpdateOutcome, WriteModel,
};

/// Construction options for a collection
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Document lifetime in milliseconds
    pub ttl: Option<u64>,
    /// Indexes applied on first initialization instead of the `_path` index
    pub indexes: Vec<IndexSpec>,
    /// Fail registration when the name is already registered
    pub unique: bool,
    /// Chunk size in bytes for chunked saves
    pub chunk_size: Option<usize>,
    /// Store collection to bind to instead of the database connection
    pub handle: Option<Arc<dyn StoreCollection>>,
}

impl CollectionOptions {
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn with_index(mut self, index: impl Into<IndexSpec>) -> Self {
        self.indexes.push(index.into());
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn with_handle(mut self, handle: Arc<dyn StoreCollection>) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// Index declaration: one key name, or a full key document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    pub key: Option<String>,
    pub keys: Option<Document>,
    pub options: IndexOptions,
    /// Drop an index of the same name before creating this one
    pub forced: bool,
}

impl IndexSpec {
    /// Ascending index on one field
    pub fn key(field: impl Into<String>) -> Self {
        Self {
            key: Some(field.into()),
            ..Default::default()
        }
    }

    /// Index on a key document (`{field: 1 | -1, ...}`)
    pub fn keys(keys: Document) -> Self {
        Self {
            keys: Some(keys),
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    /// Resolve to a store index model; `keys` wins over `key`
    pub fn to_model(&self) -> CollectionResult<IndexModel> {
        let keys = match (&self.keys, &self.key) {
            (Some(keys), _) if !keys.is_empty() => keys.clone(),
            (_, Some(key)) if !key.is_empty() => {
                let mut keys = Map::new();
                keys.insert(key.clone(), Value::from(1));
                keys
            }
            _ => {
                return Err(CollectionError::InvalidIndex(
                    "an index needs a key or keys".into(),
                ))
            }
        };
        Ok(IndexModel::new(keys, self.options.clone()))
    }
}

impl From<&str> for IndexSpec {
    fn from(field: &str) -> Self {
        IndexSpec::key(field)
    }
}

impl From<String> for IndexSpec {
    fn from(field: String) -> Self {
        IndexSpec::key(field)
    }
}

/// Options for `Collection::save`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Split the encoded value over several records
    pub chunked: bool,
    /// Return the write model instead of executing it
    pub bulk: bool,
}

impl SaveOptions {
    pub fn chunked() -> Self {
        Self {
            chunked: true,
            ..Default::default()
        }
    }

    pub fn bulk() -> Self {
        Self {
            bulk: true,
            ..Default::default()
        }
    }
}

/// What a save did
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Upserted one record
    Saved(UpdateOutcome),
    /// Wrote a chunk family of `chunks` data records
    Chunked { chunks: usize },
    /// Bulk mode: nothing was executed
    Deferred(WriteModel),
}

impl SaveOutcome {
    /// The deferred write model, if any
    pub fn into_write_model(self) -> Option<WriteModel> {
        match self {
            SaveOutcome::Deferred(model) => Some(model),
            _ => None,
        }
    }
}

/// Options for `Collection::load`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Store projection; exclusive with `fields`
    pub projection: Option<Document>,
    /// Top-level attributes to keep; exclusive with `projection`
    pub fields: Option<Vec<String>>,
    /// Load a chunk family
    pub chunked: bool,
    /// Returned when nothing is found; missing object keys are merged in otherwise
    pub default: Option<Value>,
    /// Skip cleaning and `_content` unwrapping
    pub raw: bool,
}

impl LoadOptions {
    pub fn chunked() -> Self {
        Self {
            chunked: true,
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub(crate) fn validate(&self) -> CollectionResult<()> {
        if self.projection.is_some() && self.fields.is_some() {
            return Err(CollectionError::InvalidOptions(
                "projection and fields are mutually exclusive".into(),
            ));
        }
        if self.chunked && (self.projection.is_some() || self.fields.is_some()) {
            return Err(CollectionError::InvalidOptions(
                "chunked documents are loaded whole".into(),
            ));
        }
        Ok(())
    }
}

/// Options for the list operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    pub projection: Option<Document>,
    pub raw: bool,
}

/// Options for `Collection::delete`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove the whole chunk family
    pub chunked: bool,
}

/// Options for `Collection::aggregate`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Hand back the result stream instead of collecting it
    pub cursor: bool,
    /// Strip reserved fields from collected results
    pub clean: bool,
}

/// Aggregation result
pub enum AggregateOutput {
    Cursor(DocumentStream),
    Documents(Vec<Value>),
}

impl AggregateOutput {
    /// Collected documents, if the output was not a cursor
    pub fn into_documents(self) -> Option<Vec<Value>> {
        match self {
            AggregateOutput::Documents(docs) => Some(docs),
            AggregateOutput::Cursor(_) => None,
        }
    }
}

impl fmt::Debug for AggregateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOutput::Cursor(_) => f.write_str("Cursor(..)"),
            AggregateOutput::Documents(docs) => f.debug_tuple("Documents").field(docs).finish(),
        }
    }
}
