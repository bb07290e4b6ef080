//! # In-Process Store
//!
//! A [`StoreDriver`] that keeps collections in memory, addressed by
//! `memory://<namespace>` URIs. Clients built by one driver for the same
//! namespace share data, so a database can be closed and reopened.
//!
//! Behaviour follows the usual document-database contract closely enough to
//! back the persistence layer:
//!
//! - client-level operations require a prior `connect`
//! - writing to a collection that does not exist creates it
//! - every collection has a unique `_id_` index; other unique indexes are
//!   enforced on write
//! - TTL indexes expire documents whose indexed RFC 3339 timestamp is older
//!   than `expire_after_seconds`; expiry runs before each operation
//! - ordered bulk writes stop at the first failing operation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::fields::{get_path, project, sort_documents};
use super::filter::matches;
use super::pipeline;
use super::update::{apply, upsert_seed};
use super::{
    BulkWriteResult, Document, DocumentStream, FindOptions, IndexInfo, IndexModel, StoreClient,
    StoreCollection, StoreDriver, UpdateOutcome, WriteModel,
};
use crate::config::ClientOptions;

/// URI scheme handled by [`MemoryDriver`]
pub const MEMORY_SCHEME: &str = "memory://";

const ID_INDEX: &str = "_id_";

/// Driver for `memory://` URIs
#[derive(Debug, Default)]
pub struct MemoryDriver {
    namespaces: Mutex<HashMap<String, Arc<MemoryState>>>,
}

impl MemoryDriver {
    /// Create a driver with no namespaces
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state of a namespace, created on first use
    pub fn namespace(&self, name: &str) -> Arc<MemoryState> {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryState::default()))
            .clone()
    }
}

impl StoreDriver for MemoryDriver {
    fn client(&self, uri: &str, options: &ClientOptions) -> StoreResult<Arc<dyn StoreClient>> {
        let rest = uri
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| StoreError::InvalidUri(format!("unsupported scheme in '{}'", uri)))?;
        let namespace = rest.split(['?', '/']).next().unwrap_or_default();
        if namespace.is_empty() {
            return Err(StoreError::InvalidUri(format!("missing namespace in '{}'", uri)));
        }

        Ok(Arc::new(MemoryClient {
            namespace: namespace.to_string(),
            state: self.namespace(namespace),
            options: options.clone(),
            connected: AtomicBool::new(false),
        }))
    }
}

/// Data and connection behaviour of one namespace
#[derive(Debug, Default)]
pub struct MemoryState {
    collections: RwLock<HashMap<String, CollectionData>>,
    unreachable: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    connect_attempts: AtomicUsize,
}

impl MemoryState {
    /// Make subsequent connects fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every connect by the given duration
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self
            .connect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Number of connect attempts made by all clients of this namespace
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Names of the collections currently present
    pub fn collection_names(&self) -> StoreResult<Vec<String>> {
        let collections = self.collections.read().map_err(|_| StoreError::poisoned())?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Raw documents of a collection in insertion order
    pub fn documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().map_err(|_| StoreError::poisoned())?;
        Ok(collections
            .get(collection)
            .map(|data| data.docs.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl CollectionData {
    fn new() -> Self {
        let mut keys = Document::new();
        keys.insert("_id".into(), json!(1));
        Self {
            docs: Vec::new(),
            indexes: vec![IndexInfo {
                name: ID_INDEX.into(),
                keys,
                unique: true,
                expire_after_seconds: None,
            }],
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let ttl: Vec<(String, u64)> = self
            .indexes
            .iter()
            .filter_map(|index| {
                let secs = index.expire_after_seconds?;
                let field = index.keys.keys().next()?;
                Some((field.clone(), secs))
            })
            .collect();

        for (field, secs) in ttl {
            let before = self.docs.len();
            self.docs.retain(|doc| {
                let stamp = get_path(doc, &field)
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
                let Some(stamp) = stamp else {
                    return true;
                };
                // A lifetime past chrono's range never expires
                i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .and_then(|lifetime| stamp.with_timezone(&Utc).checked_add_signed(lifetime))
                    .map_or(true, |expires| expires > now)
            });
            let purged = before - self.docs.len();
            if purged > 0 {
                debug!(field = %field, purged, "expired documents removed");
            }
        }
    }

    fn position(&self, filter: &Document) -> StoreResult<Option<usize>> {
        for (pos, doc) in self.docs.iter().enumerate() {
            if matches(doc, filter)? {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    fn matching(&self, filter: &Document) -> StoreResult<Vec<Document>> {
        let mut out = Vec::new();
        for doc in &self.docs {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    fn index_key(index: &IndexInfo, doc: &Document) -> Vec<Value> {
        index
            .keys
            .keys()
            .map(|field| get_path(doc, field).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Reject `candidate` if it collides on a unique index with any document
    /// other than the one at `skip`
    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = Self::index_key(index, candidate);
            let collides = self
                .docs
                .iter()
                .enumerate()
                .any(|(pos, doc)| Some(pos) != skip && Self::index_key(index, doc) == key);
            if collides {
                return Err(StoreError::DuplicateKey {
                    index: index.name.clone(),
                    key: Value::Array(key).to_string(),
                });
            }
        }
        Ok(())
    }

    fn update_one(
        &mut self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        if let Some(pos) = self.position(filter)? {
            let mut candidate = self.docs[pos].clone();
            apply(&mut candidate, update, false)?;
            self.check_unique(&candidate, Some(pos))?;
            let modified = candidate != self.docs[pos];
            self.docs[pos] = candidate;
            return Ok(UpdateOutcome {
                matched: 1,
                modified: u64::from(modified),
                upserted: false,
            });
        }

        if !upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut seed = upsert_seed(filter, update)?;
        seed.entry("_id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        self.check_unique(&seed, None)?;
        self.docs.push(seed);

        Ok(UpdateOutcome {
            matched: 0,
            modified: 0,
            upserted: true,
        })
    }

    fn delete(&mut self, filter: &Document, limit_one: bool) -> StoreResult<u64> {
        let mut deleted = 0;
        let mut kept = Vec::with_capacity(self.docs.len());
        for doc in self.docs.drain(..) {
            let remove = (!limit_one || deleted == 0) && matches(&doc, filter)?;
            if remove {
                deleted += 1;
            } else {
                kept.push(doc);
            }
        }
        self.docs = kept;
        Ok(deleted)
    }

    fn execute(&mut self, model: &WriteModel, result: &mut BulkWriteResult) -> StoreResult<()> {
        match model {
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let outcome = self.update_one(filter, update, *upsert)?;
                result.record_update(outcome);
            }
            WriteModel::DeleteOne { filter } => result.deleted += self.delete(filter, true)?,
            WriteModel::DeleteMany { filter } => result.deleted += self.delete(filter, false)?,
        }
        Ok(())
    }
}

/// A client bound to one namespace
#[derive(Debug)]
pub struct MemoryClient {
    namespace: String,
    state: Arc<MemoryState>,
    options: ClientOptions,
    connected: AtomicBool,
}

impl MemoryClient {
    /// Options the client was built with
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn require_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn connect(&self) -> StoreResult<()> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .state
            .connect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionRefused(format!(
                "{}{} is unreachable",
                MEMORY_SCHEME, self.namespace
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        self.require_connected()?;
        self.state.collection_names()
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.require_connected()?;
        let mut collections = self
            .state
            .collections
            .write()
            .map_err(|_| StoreError::poisoned())?;
        if collections.contains_key(name) {
            return Err(StoreError::NamespaceExists(name.to_string()));
        }
        collections.insert(name.to_string(), CollectionData::new());
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }
}

/// Handle to one in-memory collection
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    state: Arc<MemoryState>,
}

impl MemoryCollection {
    /// Run `f` against the collection, creating it if missing
    fn write<R>(&self, f: impl FnOnce(&mut CollectionData) -> StoreResult<R>) -> StoreResult<R> {
        let mut collections = self
            .state
            .collections
            .write()
            .map_err(|_| StoreError::poisoned())?;
        let data = collections
            .entry(self.name.clone())
            .or_insert_with(CollectionData::new);
        data.purge_expired(Utc::now());
        f(data)
    }

    /// Run `f` against the collection if it exists
    fn read<R>(
        &self,
        missing: R,
        f: impl FnOnce(&mut CollectionData) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut collections = self
            .state
            .collections
            .write()
            .map_err(|_| StoreError::poisoned())?;
        match collections.get_mut(&self.name) {
            Some(data) => {
                data.purge_expired(Utc::now());
                f(data)
            }
            None => Ok(missing),
        }
    }
}

fn finish(mut docs: Vec<Document>, options: &FindOptions) -> StoreResult<Vec<Document>> {
    if let Some(sort) = &options.sort {
        sort_documents(&mut docs, sort)?;
    }
    let docs = docs
        .into_iter()
        .skip(options.skip.unwrap_or(0))
        .take(options.limit.unwrap_or(usize::MAX));
    match &options.projection {
        Some(projection) => docs.map(|doc| project(&doc, projection)).collect(),
        None => Ok(docs.collect()),
    }
}

#[async_trait]
impl StoreCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(
        &self,
        filter: &Document,
        options: FindOptions,
    ) -> StoreResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        let found = self.find(filter, options).await?;
        Ok(found.into_iter().next())
    }

    async fn find(&self, filter: &Document, options: FindOptions) -> StoreResult<Vec<Document>> {
        let docs = self.read(Vec::new(), |data| data.matching(filter))?;
        finish(docs, &options)
    }

    async fn count(&self, filter: &Document) -> StoreResult<u64> {
        self.read(0, |data| Ok(data.matching(filter)?.len() as u64))
    }

    async fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.write(|data| data.update_one(filter, update, upsert))
    }

    async fn delete_many(&self, filter: &Document) -> StoreResult<u64> {
        self.read(0, |data| data.delete(filter, false))
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        ordered: bool,
    ) -> StoreResult<BulkWriteResult> {
        self.write(|data| {
            let mut result = BulkWriteResult::default();
            let mut first_error = None;

            for (index, model) in models.iter().enumerate() {
                if let Err(e) = data.execute(model, &mut result) {
                    let failure = StoreError::BulkWriteFailed {
                        index,
                        message: e.to_string(),
                    };
                    if ordered {
                        return Err(failure);
                    }
                    first_error.get_or_insert(failure);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(result),
            }
        })
    }

    async fn create_index(&self, index: &IndexModel) -> StoreResult<String> {
        let name = index.name();
        self.write(|data| {
            let info = IndexInfo {
                name: name.clone(),
                keys: index.keys.clone(),
                unique: index.options.unique,
                expire_after_seconds: index.options.expire_after_seconds,
            };

            if let Some(existing) = data.indexes.iter().find(|i| i.name == name) {
                return if *existing == info {
                    Ok(name.clone())
                } else {
                    Err(StoreError::IndexOptionsConflict(name.clone()))
                };
            }

            if info.unique {
                for (pos, doc) in data.docs.iter().enumerate() {
                    let key = CollectionData::index_key(&info, doc);
                    let duplicate = data.docs[pos + 1..]
                        .iter()
                        .any(|other| CollectionData::index_key(&info, other) == key);
                    if duplicate {
                        return Err(StoreError::DuplicateKey {
                            index: name.clone(),
                            key: Value::Array(key).to_string(),
                        });
                    }
                }
            }

            data.indexes.push(info);
            Ok(name.clone())
        })
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        if name == ID_INDEX {
            return Err(StoreError::Internal("cannot drop the _id_ index".into()));
        }
        let missing = Err(StoreError::IndexNotFound(name.to_string()));
        self.read(missing, |data| {
            let before = data.indexes.len();
            data.indexes.retain(|i| i.name != name);
            if data.indexes.len() == before {
                return Ok(Err(StoreError::IndexNotFound(name.to_string())));
            }
            Ok(Ok(()))
        })?
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        self.read(Vec::new(), |data| Ok(data.indexes.clone()))
    }

    async fn drop_collection(&self) -> StoreResult<()> {
        let mut collections = self
            .state
            .collections
            .write()
            .map_err(|_| StoreError::poisoned())?;
        collections.remove(&self.name);
        Ok(())
    }

    async fn aggregate(&self, pipeline: &[Document]) -> StoreResult<DocumentStream> {
        let docs = self.read(Vec::new(), |data| Ok(data.docs.clone()))?;
        let out = pipeline::run(docs, pipeline)?;
        Ok(stream::iter(out.into_iter().map(Ok)).boxed())
    }
}
