//! Document Reference Tests
//!
//! Tests for document references and documents:
//! - Defaults only fill missing keys, at any depth
//! - Envelope wrapping is transparent for every value type
//! - Versioned references upgrade old records on load
//! - Documents edit and persist through their reference

use std::sync::Arc;

use chunkstore::collection::{CollectionOptions, LoadOptions};
use chunkstore::config::DatabaseConfig;
use chunkstore::database::Database;
use chunkstore::document::{
    stored_version, DocumentMut, DocumentRef, DocumentView, RECORD_VERSION_FIELD,
};
use chunkstore::store::MemoryDriver;
use chunkstore::Collection;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

async fn collection(namespace: &str, name: &str) -> Arc<Collection> {
    let config = DatabaseConfig::new(format!("memory://{}", namespace)).production(true);
    let db = Database::new(config, Arc::new(MemoryDriver::new()));
    db.initialize().await.unwrap();
    db.collection(name, CollectionOptions::default()).unwrap()
}

// =============================================================================
// Default Merge Tests
// =============================================================================

/// Stored keys always win over defaults; only gaps are filled.
#[tokio::test]
async fn test_default_merge_is_non_destructive() {
    let settings = collection("defaults", "settings").await;
    let default = json!({
        "theme": "light",
        "editor": {"tabs": 4, "wrap": false, "font": {"size": 12, "family": "mono"}},
        "plugins": ["a", "b"]
    });

    DocumentRef::new(settings.clone(), "settings/ann")
        .save(&json!({
            "theme": "dark",
            "editor": {"tabs": 2, "font": {"size": 14}},
            "plugins": []
        }))
        .await
        .unwrap();

    let reference = DocumentRef::builder(settings, "settings/ann")
        .default_value(default)
        .build()
        .unwrap();

    assert_eq!(
        reference.load().await.unwrap(),
        Some(json!({
            "theme": "dark",
            "editor": {"tabs": 2, "wrap": false, "font": {"size": 14, "family": "mono"}},
            "plugins": []
        }))
    );
}

/// A stored scalar is never replaced by an object default.
#[tokio::test]
async fn test_default_does_not_replace_scalar() {
    let c = collection("scalar", "values").await;
    let reference = DocumentRef::builder(c, "v")
        .default_value(json!({"a": 1}))
        .build()
        .unwrap();

    reference.save(&json!("stored")).await.unwrap();
    assert_eq!(reference.load().await.unwrap(), Some(json!("stored")));
}

// =============================================================================
// Envelope Tests
// =============================================================================

/// Every value type loads back exactly as saved, repeatedly.
#[tokio::test]
async fn test_envelope_is_transparent() {
    let c = collection("envelope", "values").await;
    let values = vec![
        json!(true),
        json!(0),
        json!(-7.5),
        json!("text"),
        json!([1, "two", {"three": 3}]),
        json!(null),
        json!({"object": {"nested": [1]}}),
    ];

    for value in values {
        let reference = DocumentRef::new(c.clone(), "v");
        for _ in 0..2 {
            reference.save(&value).await.unwrap();
            assert_eq!(reference.load().await.unwrap(), Some(value.clone()));
        }
    }
}

// =============================================================================
// Versioning Tests
// =============================================================================

/// Unmarked records are version 1 and get upgraded to the configured version.
#[tokio::test]
async fn test_unmarked_record_upgraded() {
    let c = collection("versions", "people").await;
    c.save("p/1", json!({"first": "Ann", "last": "Lee"}), Default::default())
        .await
        .unwrap();

    let reference = DocumentRef::builder(c.clone(), "p/1")
        .record_version(2)
        .transform_version(|target, raw| {
            let name = format!(
                "{} {}",
                raw["first"].as_str().unwrap_or_default(),
                raw["last"].as_str().unwrap_or_default()
            );
            json!({"name": name, RECORD_VERSION_FIELD: target})
        })
        .build()
        .unwrap();

    let mut doc = reference.fetch().await.unwrap().unwrap();
    assert_eq!(doc.data()["name"], json!("Ann Lee"));

    doc.save().await.unwrap();
    let stored = c.load("p/1", LoadOptions::default()).await.unwrap().unwrap();
    assert_eq!(stored_version(&stored), 2);
}

/// References without versioning never stamp records.
#[tokio::test]
async fn test_unversioned_save_has_no_marker() {
    let c = collection("unversioned", "people").await;
    DocumentRef::new(c.clone(), "p/2")
        .save(&json!({"name": "Bo"}))
        .await
        .unwrap();

    let stored = c.load("p/2", LoadOptions::default()).await.unwrap().unwrap();
    assert!(stored.get(RECORD_VERSION_FIELD).is_none());
}

// =============================================================================
// Document Tests
// =============================================================================

/// A document fetched from a default is not marked as existing.
#[tokio::test]
async fn test_fetch_default_document() {
    let c = collection("fetch", "drafts").await;
    let reference = DocumentRef::builder(c, "d/1")
        .default_value(json!({"title": "Untitled"}))
        .build()
        .unwrap();

    let mut doc = reference.fetch().await.unwrap().unwrap();
    assert!(!doc.exists());

    doc.data_mut()["title"] = json!("Plan");
    doc.save().await.unwrap();

    let view = reference.fetch().await.unwrap().unwrap().into_view();
    assert!(view.exists());
    assert_eq!(view.data()["title"], Value::from("Plan"));
}

/// Partial saves merge in memory and persist only the partial.
#[tokio::test]
async fn test_document_partial_save() {
    let c = collection("partial", "profiles").await;
    let reference = DocumentRef::new(c.clone(), "u/1");
    reference
        .save(&json!({"name": "Ann", "stats": {"posts": 1, "likes": 4}}))
        .await
        .unwrap();

    let mut doc = reference.fetch().await.unwrap().unwrap();
    let partial = json!({"name": "Ann Lee"}).as_object().cloned().unwrap();
    doc.save_partial(partial).await.unwrap();

    assert_eq!(doc.data()["name"], json!("Ann Lee"));
    assert_eq!(doc.data()["stats"]["likes"], json!(4));
    assert_eq!(
        reference.load().await.unwrap(),
        Some(json!({"name": "Ann Lee", "stats": {"posts": 1, "likes": 4}}))
    );
}
