//! # Collection
//!
//! One named collection of the store: lazy binding and index setup, path
//! addressed CRUD, chunked storage of large values, listing and aggregation.
//!
//! Values are stored in one of two shapes:
//!
//! - objects: their fields are `$set` on the record (reserved fields dropped)
//! - anything else: wrapped as `{_content: value}`
//!
//! Loading reverses this. Chunked values live in a record family, see
//! [`chunked`].

mod binding;
pub mod chunked;
pub mod errors;
pub mod options;
pub mod query;
pub mod ttl;

use std::sync::Arc;

use chrono::Utc;
use futures_util::TryStreamExt;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::database::Connection;
use crate::merge::merge_missing;
use crate::store::update::is_operator_update;
use crate::store::{
    BulkWriteResult, Document, FindOptions, StoreCollection, UpdateOutcome, WriteModel,
};

use binding::{BindingSource, StoreBinding};
pub use chunked::{CHUNKS_FIELD, CHUNK_FIELD, DATA_FIELD};
pub use errors::{CollectionError, CollectionResult, Operation};
pub use options::{
    AggregateOptions, AggregateOutput, CollectionOptions, DeleteOptions, IndexSpec, ListOptions,
    LoadOptions, SaveOptions, SaveOutcome,
};
pub use query::{prefix_filter, Query, PATH_FIELD};
pub use ttl::{TtlAction, TTL_FIELD};

/// Store-assigned identity
pub const ID_FIELD: &str = "_id";

/// Optional secondary identity, never written from a save payload
pub const UID_FIELD: &str = "_uid";

/// Envelope for non-object values
pub const CONTENT_FIELD: &str = "_content";

/// Fields removed from object payloads before saving
pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, PATH_FIELD, UID_FIELD, TTL_FIELD];

/// Default slice size of chunked values: 4 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// A named collection
#[derive(Debug)]
pub struct Collection {
    name: String,
    ttl: Option<u64>,
    chunk_size: usize,
    indexes: Vec<IndexSpec>,
    binding: StoreBinding,
}

impl Collection {
    /// Collection bound through a database connection
    ///
    /// A handle in `options` takes precedence over the connection.
    pub(crate) fn attached(
        name: &str,
        mut options: CollectionOptions,
        connection: Arc<Connection>,
    ) -> Self {
        let source = match options.handle.take() {
            Some(handle) => BindingSource::Handle(handle),
            None => BindingSource::Database(connection),
        };
        Self::from_parts(name, options, source)
    }

    /// Collection bound to an existing store handle; no database involved
    pub fn detached(
        name: &str,
        handle: Arc<dyn StoreCollection>,
        options: CollectionOptions,
    ) -> Self {
        Self::from_parts(name, options, BindingSource::Handle(handle))
    }

    fn from_parts(name: &str, options: CollectionOptions, source: BindingSource) -> Self {
        Self {
            name: name.to_string(),
            ttl: options.ttl,
            chunk_size: options
                .chunk_size
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            indexes: options.indexes,
            binding: StoreBinding::new(source),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document lifetime in milliseconds
    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    pub fn ttl_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_bound()
    }

    /// The bound store handle; fails before initialization
    pub fn store_handle(&self) -> CollectionResult<Arc<dyn StoreCollection>> {
        self.binding.get(&self.name).map(Arc::clone)
    }

    // ==================
    // Initialization
    // ==================

    /// Bind the store handle and set up indexes; runs once
    pub async fn init(&self) -> CollectionResult<()> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&self) -> CollectionResult<&Arc<dyn StoreCollection>> {
        if let Ok(handle) = self.binding.get(&self.name) {
            return Ok(handle);
        }
        self.binding
            .bind(&self.name, |handle| async move {
                self.setup(handle.as_ref()).await
            })
            .await
            .map_err(|e| self.surface(Operation::Init, e))?;
        self.binding.get(&self.name)
    }

    async fn setup(&self, handle: &dyn StoreCollection) -> CollectionResult<()> {
        if let Some(ttl) = self.ttl {
            ttl::setup_ttl(handle, ttl).await?;
        }

        if self.indexes.is_empty() {
            ttl::create_index(handle, &IndexSpec::key(PATH_FIELD)).await?;
        } else {
            for spec in &self.indexes {
                ttl::create_index(handle, spec).await?;
            }
        }

        info!(collection = %self.name, "collection initialized");
        Ok(())
    }

    /// Create an index; returns its name
    pub async fn create_index(&self, spec: impl Into<IndexSpec>) -> CollectionResult<String> {
        let spec = spec.into();
        spec.to_model()?;
        let handle = self.handle().await?;
        ttl::create_index(handle.as_ref(), &spec)
            .await
            .map_err(|e| self.surface(Operation::Index, e))
    }

    /// Reconcile the TTL index with this collection's lifetime
    pub async fn setup_ttl(&self) -> CollectionResult<Option<TtlAction>> {
        let Some(ttl) = self.ttl else {
            return Ok(None);
        };
        let handle = self.handle().await?;
        ttl::setup_ttl(handle.as_ref(), ttl)
            .await
            .map(Some)
            .map_err(|e| self.surface(Operation::Index, e))
    }

    // ==================
    // Writes
    // ==================

    /// Save a value at a path or filter
    ///
    /// In bulk mode nothing is executed; the write model is returned for a
    /// later `bulk_write`.
    pub async fn save(
        &self,
        query: impl Into<Query>,
        content: Value,
        options: SaveOptions,
    ) -> CollectionResult<SaveOutcome> {
        let query = query.into();
        if options.chunked && options.bulk {
            return Err(CollectionError::InvalidOptions(
                "chunked values cannot be saved in bulk mode".into(),
            ));
        }
        if options.bulk {
            return Ok(SaveOutcome::Deferred(self.save_model(&query, content)));
        }

        let handle = self.handle().await?;
        let result = if options.chunked {
            self.save_chunked(handle.as_ref(), &query, &content)
                .await
                .map(|chunks| SaveOutcome::Chunked { chunks })
        } else {
            let update = self.save_update(content);
            handle
                .update_one(&plain_filter(&query), &update, true)
                .await
                .map(SaveOutcome::Saved)
                .map_err(CollectionError::from)
        };
        result.map_err(|e| self.surface(Operation::Save, e))
    }

    /// The upsert a non-chunked save performs
    pub fn save_model(&self, query: &Query, content: Value) -> WriteModel {
        WriteModel::UpdateOne {
            filter: plain_filter(query),
            update: self.save_update(content),
            upsert: true,
        }
    }

    fn save_update(&self, content: Value) -> Document {
        let mut update = Document::new();
        match content {
            Value::Object(mut fields) => {
                for field in RESERVED_FIELDS {
                    fields.remove(field);
                }
                let has_content = fields.contains_key(CONTENT_FIELD);
                if !fields.is_empty() {
                    update.insert("$set".into(), Value::Object(fields));
                }
                if !has_content {
                    update.insert("$unset".into(), json!({ CONTENT_FIELD: "" }));
                }
            }
            other => {
                update.insert("$set".into(), json!({ CONTENT_FIELD: other }));
            }
        }
        self.stamp_insert(&mut update);
        update
    }

    /// Add `$setOnInsert: {_ttl_timestamp: now}` when TTL is enabled
    fn stamp_insert(&self, update: &mut Document) {
        if !self.ttl_enabled() {
            return;
        }
        let now = Value::String(Utc::now().to_rfc3339());
        match update.get_mut("$setOnInsert") {
            Some(Value::Object(on_insert)) => {
                on_insert.insert(TTL_FIELD.into(), now);
            }
            _ => {
                update.insert("$setOnInsert".into(), json!({ TTL_FIELD: now }));
            }
        }
    }

    /// Upsert with an operator update, or `$set` a plain object
    pub async fn update(
        &self,
        query: impl Into<Query>,
        update: Document,
    ) -> CollectionResult<UpdateOutcome> {
        let query = query.into();
        let update = if is_operator_update(&update) {
            let mut update = update;
            self.stamp_insert(&mut update);
            update
        } else {
            self.save_update(Value::Object(update))
        };

        let handle = self.handle().await?;
        handle
            .update_one(&plain_filter(&query), &update, true)
            .await
            .map_err(|e| self.surface(Operation::Update, e.into()))
    }

    /// Execute deferred write models as one ordered batch
    pub async fn bulk_write(&self, models: Vec<WriteModel>) -> CollectionResult<BulkWriteResult> {
        let handle = self.handle().await?;
        if models.is_empty() {
            return Ok(BulkWriteResult::default());
        }
        handle
            .bulk_write(models, true)
            .await
            .map_err(|e| self.surface(Operation::BulkWrite, e.into()))
    }

    // ==================
    // Reads
    // ==================

    /// Load a value; `None` when missing and no default is given
    pub async fn load(
        &self,
        query: impl Into<Query>,
        options: LoadOptions,
    ) -> CollectionResult<Option<Value>> {
        let query = query.into();
        options.validate()?;

        let handle = self.handle().await?;
        let loaded = if options.chunked {
            self.load_chunked(handle.as_ref(), &query).await
        } else {
            self.load_record(handle.as_ref(), &query, &options).await
        }
        .map_err(|e| self.surface(Operation::Load, e))?;

        Ok(match (loaded, options.default) {
            (None, default) => default,
            (Some(mut value), Some(default)) if !options.raw => {
                merge_missing(&mut value, &default);
                Some(value)
            }
            (Some(value), _) => Some(value),
        })
    }

    async fn load_record(
        &self,
        handle: &dyn StoreCollection,
        query: &Query,
        options: &LoadOptions,
    ) -> CollectionResult<Option<Value>> {
        let projection = match (&options.projection, &options.fields) {
            (Some(projection), _) => Some(projection.clone()),
            (None, Some(fields)) => Some(
                fields
                    .iter()
                    .map(|field| (field.clone(), Value::from(1)))
                    .collect(),
            ),
            (None, None) => None,
        };
        let find = FindOptions {
            projection,
            ..Default::default()
        };

        let Some(record) = handle.find_one(&plain_filter(query), find).await? else {
            return Ok(None);
        };
        if options.raw {
            return Ok(Some(Value::Object(record)));
        }
        Ok(Some(self.present(record)))
    }

    /// Whether a record (or a chunk family) exists, without fetching it
    pub async fn exists(&self, query: impl Into<Query>, chunked: bool) -> CollectionResult<bool> {
        let query = query.into();
        let filter = if chunked {
            chunked::reference_filter(&query)
        } else {
            plain_filter(&query)
        };

        let handle = self.handle().await?;
        handle
            .count(&filter)
            .await
            .map(|n| n > 0)
            .map_err(|e| self.surface(Operation::Count, e.into()))
    }

    /// Number of records matching the query
    pub async fn count(&self, query: impl Into<Query>) -> CollectionResult<u64> {
        let filter = query.into().to_filter();
        let handle = self.handle().await?;
        handle
            .count(&filter)
            .await
            .map_err(|e| self.surface(Operation::Count, e.into()))
    }

    /// Values stored under a directory-style path
    ///
    /// Chunk family records are skipped; load chunked values by path.
    pub async fn list(&self, path: &str, options: ListOptions) -> CollectionResult<Vec<Value>> {
        self.list_query(without_chunks(prefix_filter(path)), options).await
    }

    /// Values matching a filter, used verbatim
    pub async fn list_query(
        &self,
        filter: Document,
        options: ListOptions,
    ) -> CollectionResult<Vec<Value>> {
        let handle = self.handle().await?;
        let find = FindOptions {
            projection: options.projection,
            ..Default::default()
        };
        let records = handle
            .find(&filter, find)
            .await
            .map_err(|e| self.surface(Operation::List, e.into()))?;

        Ok(records
            .into_iter()
            .map(|record| {
                if options.raw {
                    Value::Object(record)
                } else {
                    self.present(record)
                }
            })
            .collect())
    }

    /// Every plain value of the collection
    pub async fn list_all(&self, options: ListOptions) -> CollectionResult<Vec<Value>> {
        self.list_query(without_chunks(Document::new()), options).await
    }

    // ==================
    // Deletes
    // ==================

    /// Delete the record at a query; `chunked` removes the whole family
    pub async fn delete(
        &self,
        query: impl Into<Query>,
        options: DeleteOptions,
    ) -> CollectionResult<u64> {
        let query = query.into();
        if query.to_filter().is_empty() {
            return Err(CollectionError::EmptyDeleteQuery);
        }
        let filter = if options.chunked {
            query.to_filter()
        } else {
            plain_filter(&query)
        };
        self.remove(&filter).await
    }

    /// Delete every record matching a non-empty filter
    pub async fn delete_query(&self, filter: Document) -> CollectionResult<u64> {
        if filter.is_empty() {
            return Err(CollectionError::EmptyDeleteQuery);
        }
        self.remove(&filter).await
    }

    /// Delete every record
    pub async fn delete_all(&self) -> CollectionResult<u64> {
        self.remove(&Document::new()).await
    }

    /// Delete the records at several paths, chunk families included
    pub async fn delete_many<S: AsRef<str>>(&self, paths: &[S]) -> CollectionResult<u64> {
        if paths.is_empty() {
            return Ok(0);
        }
        let paths: Vec<Value> = paths
            .iter()
            .map(|path| Value::String(path.as_ref().to_string()))
            .collect();
        let mut filter = Document::new();
        filter.insert(PATH_FIELD.into(), json!({ "$in": paths }));
        self.remove(&filter).await
    }

    /// Delete every record, then drop the physical collection
    pub async fn delete_collection(&self) -> CollectionResult<u64> {
        let deleted = self.delete_all().await?;
        let handle = self.handle().await?;
        handle
            .drop_collection()
            .await
            .map_err(|e| self.surface(Operation::Drop, e.into()))?;

        if let Some(connection) = self.binding.connection() {
            connection.forget_collection(&self.name).await;
        }
        info!(collection = %self.name, deleted, "collection dropped");
        Ok(deleted)
    }

    async fn remove(&self, filter: &Document) -> CollectionResult<u64> {
        let handle = self.handle().await?;
        let deleted = handle
            .delete_many(filter)
            .await
            .map_err(|e| self.surface(Operation::Delete, e.into()))?;
        debug!(collection = %self.name, deleted, "records deleted");
        Ok(deleted)
    }

    // ==================
    // Aggregation
    // ==================

    /// Run an aggregation pipeline
    pub async fn aggregate(
        &self,
        pipeline: &[Document],
        options: AggregateOptions,
    ) -> CollectionResult<AggregateOutput> {
        let handle = self.handle().await?;
        let stream = handle
            .aggregate(pipeline)
            .await
            .map_err(|e| self.surface(Operation::Aggregate, e.into()))?;
        if options.cursor {
            return Ok(AggregateOutput::Cursor(stream));
        }

        let records: Vec<Document> = stream
            .try_collect()
            .await
            .map_err(|e| self.surface(Operation::Aggregate, e.into()))?;
        Ok(AggregateOutput::Documents(
            records
                .into_iter()
                .map(|record| {
                    if options.clean {
                        Value::Object(self.clean(record))
                    } else {
                        Value::Object(record)
                    }
                })
                .collect(),
        ))
    }

    // ==================
    // Record shaping
    // ==================

    /// Strip `_id`, `_path` and (with TTL) `_ttl_timestamp`
    pub fn clean(&self, mut record: Document) -> Document {
        record.remove(ID_FIELD);
        record.remove(PATH_FIELD);
        if self.ttl_enabled() {
            record.remove(TTL_FIELD);
        }
        record
    }

    /// Clean a record and unwrap the `_content` envelope
    fn present(&self, record: Document) -> Value {
        let mut record = self.clean(record);
        match record.remove(CONTENT_FIELD) {
            Some(content) => content,
            None => Value::Object(record),
        }
    }

    /// Log a store or codec failure and replace it with the operation error
    fn surface(&self, operation: Operation, err: CollectionError) -> CollectionError {
        match err {
            CollectionError::Store(e) => {
                error!(collection = %self.name, error = %e, "error while {}", operation);
                self.operation_error(operation)
            }
            CollectionError::Codec(e) => {
                error!(collection = %self.name, error = %e, "error while {}", operation);
                self.operation_error(operation)
            }
            other => other,
        }
    }

    fn operation_error(&self, operation: Operation) -> CollectionError {
        CollectionError::Operation {
            operation,
            collection: self.name.clone(),
        }
    }
}

/// Filter for the single (non-chunked) record of a query
fn plain_filter(query: &Query) -> Document {
    without_chunks(query.to_filter())
}

/// Extend a filter so it skips chunk family records
fn without_chunks(mut filter: Document) -> Document {
    let mut excluded = match filter.remove("$nor") {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    excluded.extend(chunked::family_markers());
    filter.insert("$nor".into(), Value::Array(excluded));
    filter
}
