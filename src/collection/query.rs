//! Document addressing
//!
//! A query is either a path (`"users/42"`, stored in `_path`) or an
//! arbitrary equality filter.

use serde_json::Value;

use super::errors::{CollectionError, CollectionResult};
use crate::store::Document;

/// Field holding a document's path
pub const PATH_FIELD: &str = "_path";

/// Addresses one logical document (or a set of them, for filters)
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Path key matched against `_path`
    Path(String),
    /// Filter used verbatim
    Filter(Document),
}

impl Query {
    /// Path query
    pub fn path(path: impl Into<String>) -> Self {
        Query::Path(path.into())
    }

    /// Filter query
    pub fn filter(filter: Document) -> Self {
        Query::Filter(filter)
    }

    /// The path, for path queries
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Query::Path(path) => Some(path),
            Query::Filter(_) => None,
        }
    }

    /// The store filter this query addresses
    pub fn to_filter(&self) -> Document {
        match self {
            Query::Path(path) => {
                let mut filter = Document::new();
                filter.insert(PATH_FIELD.into(), Value::String(path.clone()));
                filter
            }
            Query::Filter(filter) => filter.clone(),
        }
    }

    /// The store filter plus one extra condition
    pub fn with_field(&self, field: &str, condition: Value) -> Document {
        let mut filter = self.to_filter();
        filter.insert(field.into(), condition);
        filter
    }
}

impl From<&str> for Query {
    fn from(path: &str) -> Self {
        Query::Path(path.to_string())
    }
}

impl From<String> for Query {
    fn from(path: String) -> Self {
        Query::Path(path)
    }
}

impl From<&String> for Query {
    fn from(path: &String) -> Self {
        Query::Path(path.clone())
    }
}

impl From<Document> for Query {
    fn from(filter: Document) -> Self {
        Query::Filter(filter)
    }
}

impl From<&Query> for Query {
    fn from(query: &Query) -> Self {
        query.clone()
    }
}

impl TryFrom<Value> for Query {
    type Error = CollectionError;

    fn try_from(value: Value) -> CollectionResult<Self> {
        match value {
            Value::String(path) => Ok(Query::Path(path)),
            Value::Object(filter) => Ok(Query::Filter(filter)),
            other => Err(CollectionError::InvalidQuery(format!(
                "expected a path string or a filter object, got {}",
                kind(&other)
            ))),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Filter selecting every document under a directory-style path
///
/// Trailing slashes are ignored; an empty path selects everything.
pub fn prefix_filter(path: &str) -> Document {
    let trimmed = path.trim_end_matches('/');
    let mut filter = Document::new();
    if !trimmed.is_empty() {
        let mut condition = Document::new();
        condition.insert(
            "$regex".into(),
            Value::String(format!("^{}/", regex::escape(trimmed))),
        );
        filter.insert(PATH_FIELD.into(), Value::Object(condition));
    }
    filter
}
