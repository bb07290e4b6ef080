//! # Aggregation Pipeline
//!
//! Evaluates pipeline stages over an in-memory document set:
//! `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count`.

use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use super::fields::{project, sort_documents};
use super::filter::matches;
use super::Document;

/// A parsed pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    Sort(Document),
    Skip(usize),
    Limit(usize),
    Project(Document),
    Count(String),
}

impl Stage {
    /// Parse a `{"$stage": operand}` document
    pub fn parse(stage: &Document) -> StoreResult<Self> {
        let mut entries = stage.iter();
        let (name, operand) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(StoreError::InvalidPipeline(
                    "each stage must have exactly one key".into(),
                ))
            }
        };

        let object = || {
            operand
                .as_object()
                .cloned()
                .ok_or_else(|| StoreError::InvalidPipeline(format!("{} expects an object", name)))
        };
        let count = || {
            operand
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| StoreError::InvalidPipeline(format!("{} expects a count", name)))
        };

        Ok(match name.as_str() {
            "$match" => Stage::Match(object()?),
            "$sort" => Stage::Sort(object()?),
            "$skip" => Stage::Skip(count()?),
            "$limit" => Stage::Limit(count()?),
            "$project" => Stage::Project(object()?),
            "$count" => Stage::Count(
                operand
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        StoreError::InvalidPipeline("$count expects a field name".into())
                    })?,
            ),
            other => {
                return Err(StoreError::InvalidPipeline(format!(
                    "unsupported stage: {}",
                    other
                )))
            }
        })
    }
}

/// Run a pipeline over the given documents
pub fn run(mut docs: Vec<Document>, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
    let stages = pipeline
        .iter()
        .map(Stage::parse)
        .collect::<StoreResult<Vec<_>>>()?;

    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, &filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            Stage::Sort(spec) => {
                sort_documents(&mut docs, &spec)?;
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(n).collect(),
            Stage::Limit(n) => docs.into_iter().take(n).collect(),
            Stage::Project(spec) => docs
                .iter()
                .map(|doc| project(doc, &spec))
                .collect::<StoreResult<Vec<_>>>()?,
            Stage::Count(field) => {
                let mut counted = Document::new();
                counted.insert(field, Value::from(docs.len() as u64));
                vec![counted]
            }
        };
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> Vec<Document> {
        vec![
            doc(json!({"_path": "a", "n": 3})),
            doc(json!({"_path": "b", "n": 1})),
            doc(json!({"_path": "c", "n": 2})),
        ]
    }

    #[test]
    fn test_match_sort_limit() {
        let out = run(
            sample(),
            &[
                doc(json!({"$match": {"n": {"$gte": 2}}})),
                doc(json!({"$sort": {"n": 1}})),
                doc(json!({"$limit": 1})),
            ],
        )
        .unwrap();
        assert_eq!(out, vec![doc(json!({"_path": "c", "n": 2}))]);
    }

    #[test]
    fn test_count() {
        let out = run(sample(), &[doc(json!({"$count": "total"}))]).unwrap();
        assert_eq!(out, vec![doc(json!({"total": 3}))]);
    }

    #[test]
    fn test_unknown_stage() {
        assert!(run(sample(), &[doc(json!({"$lookup": {}}))]).is_err());
    }

    #[test]
    fn test_multi_key_stage_rejected() {
        assert!(run(sample(), &[doc(json!({"$skip": 1, "$limit": 1}))]).is_err());
    }
}
