//! Chunked storage of large values
//!
//! A chunked value is encoded with the binary codec and split into slices of
//! the collection's chunk size. One logical document becomes a record family
//! sharing its query fields:
//!
//! - a reference record: `chunk: -1, chunks: N`
//! - N data records: `chunk: 0..N-1, data: <base64 slice>`
//!
//! The slice upserts and the reference upsert go out as one ordered bulk
//! write, so `chunks` never counts slices that are not written yet. When a
//! value shrinks, trailing data records are deleted afterwards in a separate
//! call; a concurrent reader may briefly see them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use super::errors::CollectionResult;
use super::query::Query;
use super::Collection;
use crate::codec::{self, CodecError};
use crate::store::{Document, FindOptions, StoreCollection, WriteModel};

/// Slice index field; `-1` on the reference record
pub const CHUNK_FIELD: &str = "chunk";

/// Slice count field of the reference record
pub const CHUNKS_FIELD: &str = "chunks";

/// Slice payload field of data records
pub const DATA_FIELD: &str = "data";

pub(crate) const REFERENCE_CHUNK: i64 = -1;

/// Shapes of chunk family records, for `$nor` exclusion
///
/// Both markers must be present, so a plain object with its own `chunk`
/// field is not mistaken for part of a family.
pub(crate) fn family_markers() -> Vec<Value> {
    vec![
        json!({ CHUNK_FIELD: REFERENCE_CHUNK, CHUNKS_FIELD: { "$exists": true } }),
        json!({ CHUNK_FIELD: { "$gte": 0 }, DATA_FIELD: { "$exists": true } }),
    ]
}

/// Filter for the reference record of a family
pub(crate) fn reference_filter(query: &Query) -> Document {
    let mut filter = query.with_field(CHUNK_FIELD, json!(REFERENCE_CHUNK));
    filter.insert(CHUNKS_FIELD.into(), json!({ "$exists": true }));
    filter
}

/// Filter for the data records of a family from slice `first` on
fn data_filter(query: &Query, first: usize) -> Document {
    let mut filter = query.with_field(CHUNK_FIELD, json!({ "$gte": first }));
    filter.insert(DATA_FIELD.into(), json!({ "$exists": true }));
    filter
}

/// Number of slices a buffer of `len` bytes is split into
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

impl Collection {
    pub(crate) async fn save_chunked(
        &self,
        handle: &dyn StoreCollection,
        query: &Query,
        content: &Value,
    ) -> CollectionResult<usize> {
        let buffer = codec::encode(content)?;
        let count = chunk_count(buffer.len(), self.chunk_size);

        let previous = handle
            .find_one(&reference_filter(query), FindOptions::default())
            .await?
            .and_then(|reference| reference.get(CHUNKS_FIELD).and_then(Value::as_u64))
            .unwrap_or(0) as usize;

        let mut models = Vec::with_capacity(count + 1);
        for (index, slice) in buffer.chunks(self.chunk_size).enumerate() {
            let mut set = Document::new();
            set.insert(DATA_FIELD.into(), Value::String(STANDARD.encode(slice)));
            models.push(self.chunk_upsert(query, json!(index), set));
        }

        let mut set = Document::new();
        set.insert(CHUNKS_FIELD.into(), json!(count));
        models.push(self.chunk_upsert(query, json!(REFERENCE_CHUNK), set));

        handle.bulk_write(models, true).await?;

        if count < previous {
            let stale = handle
                .delete_many(&data_filter(query, count))
                .await?;
            debug!(collection = %self.name, stale, "trailing chunks removed");
        }

        debug!(
            collection = %self.name,
            bytes = buffer.len(),
            chunks = count,
            "chunked value saved"
        );
        Ok(count)
    }

    fn chunk_upsert(&self, query: &Query, chunk: Value, set: Document) -> WriteModel {
        let mut update = Document::new();
        update.insert("$set".into(), Value::Object(set));
        self.stamp_insert(&mut update);
        WriteModel::UpdateOne {
            filter: query.with_field(CHUNK_FIELD, chunk),
            update,
            upsert: true,
        }
    }

    pub(crate) async fn load_chunked(
        &self,
        handle: &dyn StoreCollection,
        query: &Query,
    ) -> CollectionResult<Option<Value>> {
        let mut sort = Document::new();
        sort.insert(CHUNK_FIELD.into(), json!(1));
        let records = handle
            .find(&data_filter(query, 0), FindOptions::sorted(sort))
            .await?;
        if records.is_empty() {
            return Ok(None);
        }

        let mut buffer = Vec::new();
        for record in &records {
            let data = record
                .get(DATA_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::Decode("chunk record without data".into()))?;
            let slice = STANDARD
                .decode(data)
                .map_err(|e| CodecError::Decode(e.to_string()))?;
            buffer.extend_from_slice(&slice);
        }

        Ok(Some(codec::decode(&buffer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{
        CollectionOptions, DeleteOptions, LoadOptions, SaveOptions, SaveOutcome,
    };
    use crate::config::ClientOptions;
    use crate::store::{MemoryDriver, StoreDriver};
    use std::sync::Arc;

    async fn collection(chunk_size: usize) -> (Arc<dyn StoreCollection>, Collection) {
        let client = MemoryDriver::new()
            .client("memory://chunks", &ClientOptions::default())
            .unwrap();
        client.connect().await.unwrap();
        let handle = client.collection("blobs");
        let options = CollectionOptions::default().with_chunk_size(chunk_size);
        (handle.clone(), Collection::detached("blobs", handle, options))
    }

    fn chunk_numbers(records: &[Document]) -> Vec<i64> {
        let mut chunks: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get(CHUNK_FIELD).and_then(Value::as_i64))
            .collect();
        chunks.sort();
        chunks
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(1, 4), 1);
        assert_eq!(chunk_count(4, 4), 1);
        assert_eq!(chunk_count(5, 4), 2);
        assert_eq!(chunk_count(10 * 1024 * 1024 + 5, 4 * 1024 * 1024), 3);
    }

    #[tokio::test]
    async fn test_small_value_single_chunk() {
        let (handle, c) = collection(1024).await;
        let value = json!({"title": "small", "tags": ["a"]});

        let outcome = c.save("doc", value.clone(), SaveOptions::chunked()).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Chunked { chunks: 1 });
        assert_eq!(c.load("doc", LoadOptions::chunked()).await.unwrap(), Some(value));

        let records = handle.find(&Document::new(), FindOptions::default()).await.unwrap();
        assert_eq!(chunk_numbers(&records), vec![-1, 0]);
    }

    #[tokio::test]
    async fn test_value_spanning_chunks() {
        let (_, c) = collection(16).await;
        let value = json!({"body": "x".repeat(100), "n": [1, 2, 3]});

        let outcome = c.save("doc", value.clone(), SaveOptions::chunked()).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Chunked { chunks } if chunks > 1));
        assert_eq!(c.load("doc", LoadOptions::chunked()).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_shrink_removes_trailing() {
        let (handle, c) = collection(16).await;
        c.save("doc", json!("y".repeat(100)), SaveOptions::chunked()).await.unwrap();
        c.save("doc", json!("short"), SaveOptions::chunked()).await.unwrap();

        let records = handle.find(&Document::new(), FindOptions::default()).await.unwrap();
        assert_eq!(chunk_numbers(&records), vec![-1, 0]);
        let reference = records
            .iter()
            .find(|r| r.get(CHUNK_FIELD) == Some(&json!(-1)))
            .unwrap();
        assert_eq!(reference.get(CHUNKS_FIELD), Some(&json!(1)));
        assert_eq!(
            c.load("doc", LoadOptions::chunked()).await.unwrap(),
            Some(json!("short"))
        );
    }

    #[tokio::test]
    async fn test_missing_chunked_value() {
        let (_, c) = collection(16).await;
        assert_eq!(c.load("none", LoadOptions::chunked()).await.unwrap(), None);
        let opts = LoadOptions::chunked().with_default(json!([]));
        assert_eq!(c.load("none", opts).await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn test_chunked_delete_removes_family() {
        let (handle, c) = collection(8).await;
        c.save("doc", json!("z".repeat(40)), SaveOptions::chunked()).await.unwrap();
        c.save("other", json!(1), SaveOptions::default()).await.unwrap();

        let chunked = DeleteOptions { chunked: true };
        assert!(c.delete("doc", chunked).await.unwrap() > 2);
        assert_eq!(handle.count(&Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_slice_is_surfaced() {
        let (handle, c) = collection(8).await;
        c.save("doc", json!("w".repeat(20)), SaveOptions::chunked()).await.unwrap();

        let filter = json!({"_path": "doc", "chunk": 0}).as_object().cloned().unwrap();
        let update = json!({"$set": {"data": "!!not base64!!"}}).as_object().cloned().unwrap();
        handle.update_one(&filter, &update, false).await.unwrap();

        let err = c.load("doc", LoadOptions::chunked()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error while loading the document (collection 'blobs')"
        );
    }
}
