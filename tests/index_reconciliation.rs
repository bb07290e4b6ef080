//! Index Reconciliation Tests
//!
//! Tests for collection index setup:
//! - TTL reconciliation is idempotent
//! - A changed TTL drops and recreates the index once
//! - Declared indexes replace the default path index
//! - Expired documents disappear from the in-memory store

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chunkstore::collection::{
    Collection, CollectionOptions, IndexSpec, LoadOptions, SaveOptions, TtlAction, TTL_FIELD,
};
use chunkstore::config::ClientOptions;
use chunkstore::store::{
    BulkWriteResult, Document, DocumentStream, FindOptions, IndexInfo, IndexModel, MemoryDriver,
    StoreCollection, StoreDriver, StoreResult, UpdateOutcome, WriteModel,
};
use serde_json::json;

// =============================================================================
// Recording Store Collection
// =============================================================================

/// Forwards to an inner collection and records index operations
#[derive(Debug)]
struct RecordingCollection {
    inner: Arc<dyn StoreCollection>,
    created: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
}

impl RecordingCollection {
    fn new(inner: Arc<dyn StoreCollection>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            created: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
        })
    }

    fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn dropped(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }

    fn ttl_creates(&self) -> usize {
        self.created().iter().filter(|n| n.starts_with(TTL_FIELD)).count()
    }
}

#[async_trait]
impl StoreCollection for RecordingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(
        &self,
        filter: &Document,
        options: FindOptions,
    ) -> StoreResult<Option<Document>> {
        self.inner.find_one(filter, options).await
    }

    async fn find(&self, filter: &Document, options: FindOptions) -> StoreResult<Vec<Document>> {
        self.inner.find(filter, options).await
    }

    async fn count(&self, filter: &Document) -> StoreResult<u64> {
        self.inner.count(filter).await
    }

    async fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.inner.update_one(filter, update, upsert).await
    }

    async fn delete_many(&self, filter: &Document) -> StoreResult<u64> {
        self.inner.delete_many(filter).await
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        ordered: bool,
    ) -> StoreResult<BulkWriteResult> {
        self.inner.bulk_write(models, ordered).await
    }

    async fn create_index(&self, index: &IndexModel) -> StoreResult<String> {
        let name = self.inner.create_index(index).await?;
        self.created.lock().unwrap().push(name.clone());
        Ok(name)
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        self.inner.drop_index(name).await?;
        self.dropped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        self.inner.list_indexes().await
    }

    async fn drop_collection(&self) -> StoreResult<()> {
        self.inner.drop_collection().await
    }

    async fn aggregate(&self, pipeline: &[Document]) -> StoreResult<DocumentStream> {
        self.inner.aggregate(pipeline).await
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn store_collection(namespace: &str) -> Arc<dyn StoreCollection> {
    let client = MemoryDriver::new()
        .client(&format!("memory://{}", namespace), &ClientOptions::default())
        .unwrap();
    client.connect().await.unwrap();
    client.collection("sessions")
}

fn with_ttl(handle: Arc<RecordingCollection>, ttl_ms: u64) -> Collection {
    Collection::detached(
        "sessions",
        handle,
        CollectionOptions::default().with_ttl(ttl_ms),
    )
}

async fn ttl_index(handle: &dyn StoreCollection) -> Option<IndexInfo> {
    handle
        .list_indexes()
        .await
        .unwrap()
        .into_iter()
        .find(|index| index.covers(TTL_FIELD))
}

// =============================================================================
// TTL Reconciliation Tests
// =============================================================================

/// First init creates the TTL index; a second instance changes nothing.
#[tokio::test]
async fn test_ttl_reconciliation_is_idempotent() {
    let inner = store_collection("idempotent").await;

    let first = RecordingCollection::new(inner.clone());
    with_ttl(first.clone(), 60_000).init().await.unwrap();
    assert_eq!(first.ttl_creates(), 1);
    assert!(first.dropped().is_empty());

    let second = RecordingCollection::new(inner.clone());
    let collection = with_ttl(second.clone(), 60_000);
    collection.init().await.unwrap();
    assert_eq!(second.ttl_creates(), 0);
    assert!(second.dropped().is_empty());

    assert_eq!(collection.setup_ttl().await.unwrap(), Some(TtlAction::Unchanged));
    assert_eq!(ttl_index(inner.as_ref()).await.unwrap().expire_after_seconds, Some(60));
}

/// A different TTL drops the old index and creates the new one once.
#[tokio::test]
async fn test_changed_ttl_recreates_index() {
    let inner = store_collection("changed").await;
    with_ttl(RecordingCollection::new(inner.clone()), 60_000)
        .init()
        .await
        .unwrap();

    let recording = RecordingCollection::new(inner.clone());
    with_ttl(recording.clone(), 7_200_000).init().await.unwrap();

    assert_eq!(recording.dropped(), vec!["_ttl_timestamp_1".to_string()]);
    assert_eq!(recording.ttl_creates(), 1);
    assert_eq!(ttl_index(inner.as_ref()).await.unwrap().expire_after_seconds, Some(7200));
}

/// Initialization runs once per collection instance.
#[tokio::test]
async fn test_init_runs_once() {
    let recording = RecordingCollection::new(store_collection("once").await);
    let collection = Arc::new(with_ttl(recording.clone(), 1_000));

    let mut handles = Vec::new();
    for i in 0..8 {
        let collection = collection.clone();
        handles.push(tokio::spawn(async move {
            collection
                .save(format!("s/{}", i), json!({"i": i}), SaveOptions::default())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(recording.created(), vec!["_ttl_timestamp_1", "_path_1"]);
}

// =============================================================================
// Declared Index Tests
// =============================================================================

/// Declared indexes are created instead of the path index.
#[tokio::test]
async fn test_declared_indexes() {
    let recording = RecordingCollection::new(store_collection("declared").await);
    let keys = json!({"owner": 1, "created": -1}).as_object().cloned().unwrap();
    let options = CollectionOptions::default()
        .with_index("email")
        .with_index(IndexSpec::keys(keys));

    Collection::detached("sessions", recording.clone(), options)
        .init()
        .await
        .unwrap();
    assert_eq!(recording.created(), vec!["email_1", "created_-1_owner_1"]);
}

/// A forced index is dropped before it is recreated.
#[tokio::test]
async fn test_forced_index() {
    let recording = RecordingCollection::new(store_collection("forced").await);
    let collection = Collection::detached("sessions", recording.clone(), CollectionOptions::default());

    collection.create_index(IndexSpec::key("slug").forced()).await.unwrap();
    assert!(recording.dropped().is_empty());

    collection.create_index(IndexSpec::key("slug").forced()).await.unwrap();
    assert_eq!(recording.dropped(), vec!["slug_1".to_string()]);
}

// =============================================================================
// Expiry Tests
// =============================================================================

/// Documents under a zero-second TTL index are purged on the next access.
#[tokio::test]
async fn test_expired_documents_purged() {
    let recording = RecordingCollection::new(store_collection("expiry").await);
    let collection = with_ttl(recording, 0);

    collection
        .save("s/1", json!({"token": "abc"}), SaveOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert_eq!(collection.load("s/1", LoadOptions::default()).await.unwrap(), None);
}

/// A lifetime beyond the representable date range keeps documents forever.
#[tokio::test]
async fn test_oversized_ttl_keeps_documents() {
    let recording = RecordingCollection::new(store_collection("forever").await);
    let collection = with_ttl(recording, u64::MAX);

    collection
        .save("s/1", json!({"token": "abc"}), SaveOptions::default())
        .await
        .unwrap();
    collection
        .save("s/2", json!({"token": "def"}), SaveOptions::default())
        .await
        .unwrap();

    assert_eq!(
        collection.load("s/1", LoadOptions::default()).await.unwrap(),
        Some(json!({"token": "abc"}))
    );
    assert_eq!(collection.count("s/2").await.unwrap(), 1);
}
