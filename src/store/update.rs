//! # Update Application
//!
//! Applies update documents to stored documents. An update is either an
//! operator document (`$set`, `$setOnInsert`, `$unset`, `$inc`) or a plain
//! replacement document.

use serde_json::{Number, Value};

use super::errors::{StoreError, StoreResult};
use super::fields::{get_path, remove_path, set_path};
use super::filter::equality_fields;
use super::Document;

/// Whether an update document uses operators
pub fn is_operator_update(update: &Document) -> bool {
    update.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

fn operand<'a>(operator: &str, value: &'a Value) -> StoreResult<&'a Document> {
    value
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate(format!("{} expects an object", operator)))
}

/// Apply an update to an existing document (or to the seed of an upsert)
///
/// `$setOnInsert` is honoured only when `inserting` is true. `_id` is never
/// changed.
pub fn apply(doc: &mut Document, update: &Document, inserting: bool) -> StoreResult<()> {
    if !is_operator_update(update) {
        if update.keys().any(|k| k.starts_with('$')) {
            return Err(StoreError::InvalidUpdate(
                "replacement document cannot contain operators".into(),
            ));
        }
        let id = doc.remove("_id");
        doc.clear();
        doc.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(id) = id {
            doc.insert("_id".into(), id);
        }
        return Ok(());
    }

    for (operator, value) in update {
        match operator.as_str() {
            "$set" => {
                for (path, v) in operand(operator, value)? {
                    guard_id(path)?;
                    set_path(doc, path, v.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, v) in operand(operator, value)? {
                        guard_id(path)?;
                        set_path(doc, path, v.clone())?;
                    }
                }
            }
            "$unset" => {
                for path in operand(operator, value)?.keys() {
                    guard_id(path)?;
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in operand(operator, value)? {
                    guard_id(path)?;
                    let next = increment(get_path(doc, path), delta, path)?;
                    set_path(doc, path, next)?;
                }
            }
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported update operator: {}",
                    other
                )))
            }
        }
    }

    Ok(())
}

fn guard_id(path: &str) -> StoreResult<()> {
    if path == "_id" {
        return Err(StoreError::InvalidUpdate("_id is immutable".into()));
    }
    Ok(())
}

fn increment(current: Option<&Value>, delta: &Value, path: &str) -> StoreResult<Value> {
    let delta_num = match delta {
        Value::Number(n) => n,
        _ => {
            return Err(StoreError::InvalidUpdate(format!(
                "$inc on '{}' needs a number",
                path
            )))
        }
    };

    let current = match current {
        None => return Ok(delta.clone()),
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(StoreError::InvalidUpdate(format!(
                "cannot $inc non-numeric field '{}'",
                path
            )))
        }
    };

    if let (Some(a), Some(b)) = (current.as_i64(), delta_num.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::Number(sum.into()));
        }
    }

    let sum = current.as_f64().unwrap_or(0.0) + delta_num.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| StoreError::InvalidUpdate(format!("$inc on '{}' overflowed", path)))
}

/// Build the document an upsert inserts: the filter's equality fields plus
/// the update applied in insert mode
pub fn upsert_seed(filter: &Document, update: &Document) -> StoreResult<Document> {
    let mut doc = Document::new();
    if is_operator_update(update) {
        for (path, value) in equality_fields(filter) {
            set_path(&mut doc, path, value.clone())?;
        }
    }
    apply(&mut doc, update, true)?;
    Ok(doc)
}
