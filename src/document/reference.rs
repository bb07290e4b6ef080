//! Document references
//!
//! A [`DocumentRef`] names one logical document of a collection and carries
//! how to read it: the default used when it is missing, whether it is
//! chunked, and the record version with its upgrade transform. Creating one
//! performs no I/O.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::errors::{DocumentError, DocumentResult};
use super::Document;
use crate::collection::{
    Collection, DeleteOptions, LoadOptions, Query, SaveOptions, SaveOutcome,
};
use crate::merge::merge_missing;
use crate::store::update::is_operator_update;
use crate::store::{Document as Record, UpdateOutcome};

/// Schema-version marker embedded in saved objects
pub const RECORD_VERSION_FIELD: &str = "__record_version";

/// Version assumed for records without a marker
pub const BASE_RECORD_VERSION: i64 = 1;

/// Upgrades a loaded record to the target version
pub type TransformFn = Arc<dyn Fn(i64, Value) -> Value + Send + Sync>;

/// Post-processing applied to every loaded value
pub type LoadHook = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Produces a fresh default value
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Value used when a document is missing
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    /// Invoked on every load
    Factory(DefaultFactory),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Reference to one logical document
#[derive(Clone)]
pub struct DocumentRef {
    collection: Arc<Collection>,
    query: Query,
    default: Option<DefaultValue>,
    chunked: bool,
    record_version: Option<i64>,
    transform: Option<TransformFn>,
    on_load: Option<LoadHook>,
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRef")
            .field("collection", &self.collection.name())
            .field("query", &self.query)
            .field("default", &self.default)
            .field("chunked", &self.chunked)
            .field("record_version", &self.record_version)
            .field("transform", &self.transform.is_some())
            .field("on_load", &self.on_load.is_some())
            .finish()
    }
}

/// Builder for [`DocumentRef`]
pub struct DocumentRefBuilder {
    reference: DocumentRef,
}

impl DocumentRefBuilder {
    pub fn default_value(mut self, value: Value) -> Self {
        self.reference.default = Some(DefaultValue::Value(value));
        self
    }

    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.reference.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    pub fn chunked(mut self, chunked: bool) -> Self {
        self.reference.chunked = chunked;
        self
    }

    pub fn record_version(mut self, version: i64) -> Self {
        self.reference.record_version = Some(version);
        self
    }

    pub fn transform_version<F>(mut self, transform: F) -> Self
    where
        F: Fn(i64, Value) -> Value + Send + Sync + 'static,
    {
        self.reference.transform = Some(Arc::new(transform));
        self
    }

    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.reference.on_load = Some(Arc::new(hook));
        self
    }

    /// Finish the reference; a non-base version needs a transform
    pub fn build(self) -> DocumentResult<DocumentRef> {
        if let Some(version) = self.reference.record_version {
            if version != BASE_RECORD_VERSION && self.reference.transform.is_none() {
                return Err(DocumentError::MissingTransform(version));
            }
        }
        Ok(self.reference)
    }
}

impl DocumentRef {
    /// Start building a reference
    pub fn builder(collection: Arc<Collection>, query: impl Into<Query>) -> DocumentRefBuilder {
        DocumentRefBuilder {
            reference: DocumentRef {
                collection,
                query: query.into(),
                default: None,
                chunked: false,
                record_version: None,
                transform: None,
                on_load: None,
            },
        }
    }

    /// Plain reference: no default, not chunked, unversioned
    pub fn new(collection: Arc<Collection>, query: impl Into<Query>) -> Self {
        Self::builder(collection, query).reference
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn record_version(&self) -> Option<i64> {
        self.record_version
    }

    /// A fresh default value, if one is configured
    pub fn default_value(&self) -> Option<Value> {
        self.default.as_ref().map(DefaultValue::produce)
    }

    /// Whether the document is stored
    pub async fn exists(&self) -> DocumentResult<bool> {
        Ok(self.collection.exists(&self.query, self.chunked).await?)
    }

    /// Load the value, or the default when missing
    pub async fn load(&self) -> DocumentResult<Option<Value>> {
        match self.load_stored().await? {
            Some(value) => Ok(Some(value)),
            None => Ok(self.default_value()),
        }
    }

    /// Load as a [`Document`]; a missing document with a default is returned
    /// as not existing
    pub async fn fetch(&self) -> DocumentResult<Option<Document>> {
        if let Some(data) = self.load_stored().await? {
            return Ok(Some(Document::loaded(self.clone(), data)));
        }
        Ok(self
            .default_value()
            .map(|data| Document::new(self.clone(), data)))
    }

    async fn load_stored(&self) -> DocumentResult<Option<Value>> {
        let options = LoadOptions {
            chunked: self.chunked,
            ..Default::default()
        };
        let loaded = self.collection.load(&self.query, options).await?;
        Ok(loaded.map(|raw| self.prepare(raw)))
    }

    /// Upgrade, fill defaults and run the load hook on a stored value
    pub fn prepare(&self, mut value: Value) -> Value {
        if let (Some(target), Some(transform)) = (self.record_version, &self.transform) {
            let stored = stored_version(&value);
            if stored != target {
                debug!(stored, target, "upgrading record version");
                value = transform(target, value);
            }
        }

        if let Some(default) = self.default_value() {
            merge_missing(&mut value, &default);
        }

        match &self.on_load {
            Some(hook) => hook(value),
            None => value,
        }
    }

    /// Load only the given dotted field paths
    pub async fn load_partial<I, S>(&self, fields: I) -> DocumentResult<Option<Value>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let projection: Record = fields
            .into_iter()
            .map(|field| (field.into(), Value::from(1)))
            .collect();
        let options = LoadOptions {
            chunked: self.chunked,
            ..Default::default()
        }
        .with_projection(projection);
        Ok(self.collection.load(&self.query, options).await?)
    }

    /// Save the whole value, stamped with the record version
    pub async fn save(&self, data: &Value) -> DocumentResult<SaveOutcome> {
        let mut data = data.clone();
        self.stamp(&mut data);
        let options = SaveOptions {
            chunked: self.chunked,
            bulk: false,
        };
        Ok(self.collection.save(&self.query, data, options).await?)
    }

    /// Write a partial object or an operator update
    pub async fn save_partial(&self, partial: Record) -> DocumentResult<UpdateOutcome> {
        if self.chunked {
            return Err(DocumentError::ChunkedPartialSave);
        }
        if partial.is_empty() {
            return Err(DocumentError::InvalidPartial("empty update".into()));
        }

        let partial = if is_operator_update(&partial) {
            partial
        } else {
            let mut data = Value::Object(partial);
            self.stamp(&mut data);
            match data {
                Value::Object(partial) => partial,
                _ => Record::new(),
            }
        };
        Ok(self.collection.update(&self.query, partial).await?)
    }

    /// Delete the document (the whole chunk family when chunked)
    pub async fn delete(&self) -> DocumentResult<u64> {
        let options = DeleteOptions {
            chunked: self.chunked,
        };
        Ok(self.collection.delete(&self.query, options).await?)
    }

    fn stamp(&self, data: &mut Value) {
        if let (Some(version), Value::Object(fields)) = (self.record_version, data) {
            fields.insert(RECORD_VERSION_FIELD.into(), Value::from(version));
        }
    }
}

/// Embedded version of a stored value; unmarked values are version 1
pub fn stored_version(value: &Value) -> i64 {
    value
        .get(RECORD_VERSION_FIELD)
        .and_then(Value::as_i64)
        .unwrap_or(BASE_RECORD_VERSION)
}
