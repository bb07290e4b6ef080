//! # Field Paths
//!
//! Dotted-path access into documents, value ordering, projection and sort.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::errors::{StoreError, StoreResult};
use super::Document;

/// Look up a dotted path (`a.b.c`)
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects
///
/// Fails when an intermediate value exists and is not an object.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> StoreResult<()> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match rest {
        None => {
            doc.insert(head.to_string(), value);
            Ok(())
        }
        Some(rest) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(child) => set_path(child, rest, value),
                _ => Err(StoreError::InvalidUpdate(format!(
                    "cannot create field '{}' inside a non-object value",
                    path
                ))),
            }
        }
    }
}

/// Remove a dotted path, returning the removed value
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

/// Total order over JSON values
///
/// Values of different kinds order as null < number < string < object <
/// array < bool, mirroring the usual document-database type ordering.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let cmp = compare_values(x, y);
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                let cmp = ka.cmp(kb).then_with(|| compare_values(va, vb));
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Sort documents in place by a `{field: 1 | -1}` specification
pub fn sort_documents(docs: &mut [Document], sort: &Document) -> StoreResult<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(StoreError::InvalidFilter(format!(
                    "sort direction for '{}' must be 1 or -1",
                    field
                )))
            }
        };
        keys.push((field.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let cmp = match (get_path(a, field), get_path(b, field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let cmp = if *descending { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });

    Ok(())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

/// Apply an inclusion or exclusion projection
///
/// `_id` is kept by inclusion projections unless explicitly excluded. Mixing
/// inclusion and exclusion of fields other than `_id` is rejected.
pub fn project(doc: &Document, projection: &Document) -> StoreResult<Document> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let include_id = projection.get("_id").map(is_truthy).unwrap_or(true);
    let mut inclusive = None;
    for (field, flag) in projection {
        if field == "_id" {
            continue;
        }
        let flag = is_truthy(flag);
        match inclusive {
            None => inclusive = Some(flag),
            Some(mode) if mode != flag => {
                return Err(StoreError::InvalidFilter(
                    "projection cannot mix inclusion and exclusion".into(),
                ))
            }
            _ => {}
        }
    }

    match inclusive {
        Some(true) => {
            let mut projected = Document::new();
            if include_id {
                if let Some(id) = doc.get("_id") {
                    projected.insert("_id".into(), id.clone());
                }
            }
            for field in projection.keys().filter(|f| f.as_str() != "_id") {
                if let Some(value) = get_path(doc, field) {
                    set_path(&mut projected, field, value.clone())?;
                }
            }
            Ok(projected)
        }
        _ => {
            let mut projected = doc.clone();
            for field in projection.keys().filter(|f| f.as_str() != "_id") {
                remove_path(&mut projected, field);
            }
            if !include_id {
                projected.remove("_id");
            }
            Ok(projected)
        }
    }
}
