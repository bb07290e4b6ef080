//! # Filter Evaluation
//!
//! Evaluates query-filter documents against stored documents.
//!
//! A filter maps field paths to either a literal (equality) or an operator
//! document such as `{"$gte": 0}`. `$and` / `$or` / `$nor` combine sub-filters.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use super::fields::{compare_values, get_path};
use super::Document;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
}

impl FilterOperator {
    /// Parse an operator key (`$gte`)
    pub fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => FilterOperator::Eq,
            "$ne" => FilterOperator::Ne,
            "$gt" => FilterOperator::Gt,
            "$gte" => FilterOperator::Gte,
            "$lt" => FilterOperator::Lt,
            "$lte" => FilterOperator::Lte,
            "$in" => FilterOperator::In,
            "$nin" => FilterOperator::Nin,
            "$exists" => FilterOperator::Exists,
            "$regex" => FilterOperator::Regex,
            _ => return None,
        })
    }

    /// Get the operator string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "$eq",
            FilterOperator::Ne => "$ne",
            FilterOperator::Gt => "$gt",
            FilterOperator::Gte => "$gte",
            FilterOperator::Lt => "$lt",
            FilterOperator::Lte => "$lte",
            FilterOperator::In => "$in",
            FilterOperator::Nin => "$nin",
            FilterOperator::Exists => "$exists",
            FilterOperator::Regex => "$regex",
        }
    }
}

/// Check if a document matches a filter
pub fn matches(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            field if field.starts_with('$') => {
                return Err(StoreError::InvalidFilter(format!(
                    "unknown top-level operator: {}",
                    field
                )))
            }
            field => matches_field(get_path(doc, field), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn sub_filters<'a>(key: &str, condition: &'a Value) -> StoreResult<Vec<&'a Document>> {
    let items = condition
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", key)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::InvalidFilter(format!("{} entries must be objects", key)))
        })
        .collect()
}

fn is_operator_document(condition: &Value) -> bool {
    match condition.as_object() {
        Some(obj) => !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn matches_field(field_value: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    if !is_operator_document(condition) {
        return Ok(equals(field_value, condition));
    }

    // Guarded by is_operator_document
    let operators = match condition.as_object() {
        Some(obj) => obj,
        None => return Ok(false),
    };

    for (key, operand) in operators {
        let operator = FilterOperator::parse(key)
            .ok_or_else(|| StoreError::InvalidFilter(format!("unknown operator: {}", key)))?;
        if !evaluate(operator, field_value, operand)? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with array membership: `{tags: "a"}` matches `tags: ["a", "b"]`
fn equals(field_value: Option<&Value>, expected: &Value) -> bool {
    match field_value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(value) => value == expected,
    }
}

fn ordered(field_value: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    match field_value {
        // Comparisons only hold between values of the same kind
        Some(value) if same_kind(value, operand) => accept(compare_values(value, operand)),
        _ => false,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn evaluate(
    operator: FilterOperator,
    field_value: Option<&Value>,
    operand: &Value,
) -> StoreResult<bool> {
    Ok(match operator {
        FilterOperator::Eq => equals(field_value, operand),
        FilterOperator::Ne => !equals(field_value, operand),
        FilterOperator::Gt => ordered(field_value, operand, |o| o == Ordering::Greater),
        FilterOperator::Gte => ordered(field_value, operand, |o| o != Ordering::Less),
        FilterOperator::Lt => ordered(field_value, operand, |o| o == Ordering::Less),
        FilterOperator::Lte => ordered(field_value, operand, |o| o != Ordering::Greater),
        FilterOperator::In | FilterOperator::Nin => {
            let candidates = operand.as_array().ok_or_else(|| {
                StoreError::InvalidFilter(format!("{} expects an array", operator.as_str()))
            })?;
            let found = candidates.iter().any(|c| equals(field_value, c));
            if operator == FilterOperator::In {
                found
            } else {
                !found
            }
        }
        FilterOperator::Exists => {
            let wanted = operand.as_bool().unwrap_or(true);
            field_value.is_some() == wanted
        }
        FilterOperator::Regex => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| StoreError::InvalidFilter("$regex expects a string".into()))?;
            let regex = Regex::new(pattern)
                .map_err(|e| StoreError::InvalidFilter(format!("bad $regex: {}", e)))?;
            match field_value {
                Some(Value::String(s)) => regex.is_match(s),
                _ => false,
            }
        }
    })
}

/// Equality fields of a filter, used to seed upserted documents
pub fn equality_fields(filter: &Document) -> Vec<(&str, &Value)> {
    filter
        .iter()
        .filter(|(key, value)| !key.starts_with('$') && !is_operator_document(value))
        .map(|(key, value)| (key.as_str(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn check(d: Value, f: Value) -> bool {
        matches(&doc(d), &doc(f)).unwrap()
    }

    #[test]
    fn test_equality() {
        assert!(check(json!({"_path": "a/b"}), json!({"_path": "a/b"})));
        assert!(!check(json!({"_path": "a/b"}), json!({"_path": "a/c"})));
        assert!(check(json!({"a": 1}), json!({})));
    }

    #[test]
    fn test_nested_equality() {
        assert!(check(json!({"meta": {"owner": "ann"}}), json!({"meta.owner": "ann"})));
    }

    #[test]
    fn test_comparisons() {
        let d = json!({"chunk": 2});
        assert!(check(d.clone(), json!({"chunk": {"$gte": 2}})));
        assert!(!check(d.clone(), json!({"chunk": {"$gt": 2}})));
        assert!(check(d.clone(), json!({"chunk": {"$lt": 3, "$gte": 0}})));
        assert!(!check(d, json!({"chunk": {"$gte": "0"}})));
    }

    #[test]
    fn test_missing_field_does_not_compare() {
        assert!(!check(json!({"_path": "x"}), json!({"chunk": {"$gte": 0}})));
    }

    #[test]
    fn test_in_and_nin() {
        let d = json!({"_path": "a"});
        assert!(check(d.clone(), json!({"_path": {"$in": ["a", "b"]}})));
        assert!(!check(d.clone(), json!({"_path": {"$nin": ["a"]}})));
    }

    #[test]
    fn test_exists() {
        let d = json!({"chunk": -1});
        assert!(check(d.clone(), json!({"chunk": {"$exists": true}})));
        assert!(check(d, json!({"chunks": {"$exists": false}})));
    }

    #[test]
    fn test_regex_prefix() {
        assert!(check(json!({"_path": "users/42"}), json!({"_path": {"$regex": "^users/"}})));
        assert!(!check(json!({"_path": "users2/1"}), json!({"_path": {"$regex": "^users/"}})));
    }

    #[test]
    fn test_or_and() {
        let d = json!({"a": 1, "b": 2});
        assert!(check(d.clone(), json!({"$or": [{"a": 5}, {"b": 2}]})));
        assert!(!check(d, json!({"$and": [{"a": 1}, {"b": 3}]})));
    }

    #[test]
    fn test_nor() {
        let d = json!({"a": 1, "b": 2});
        assert!(check(d.clone(), json!({"$nor": [{"a": 5}, {"b": 3}]})));
        assert!(!check(d, json!({"$nor": [{"a": 5}, {"b": 2}]})));
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches(&doc(json!({"a": 1})), &doc(json!({"a": {"$near": 1}}))).is_err());
    }

    #[test]
    fn test_equality_fields() {
        let f = doc(json!({"_path": "x", "chunk": {"$gte": 0}}));
        let fields = equality_fields(&f);
        assert_eq!(fields, vec![("_path", &json!("x"))]);
    }
}
