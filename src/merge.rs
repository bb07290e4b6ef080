//! Tree merge shared by default filling and partial updates

use serde_json::{Map, Value};

/// Conflict policy when both sides hold a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Only add keys the target lacks
    KeepExisting,
    /// Source wins for arrays and scalars
    Overwrite,
}

/// Merge `source` into `target`
///
/// Recurses only where both sides are objects. Arrays are leaves.
pub fn merge(target: &mut Value, source: &Value, policy: MergePolicy) {
    let (target_map, source_map) = match (target, source) {
        (Value::Object(t), Value::Object(s)) => (t, s),
        (target, source) => {
            if policy == MergePolicy::Overwrite {
                *target = source.clone();
            }
            return;
        }
    };

    for (key, incoming) in source_map {
        match target_map.get_mut(key) {
            None => {
                target_map.insert(key.clone(), incoming.clone());
            }
            Some(existing) if existing.is_object() && incoming.is_object() => {
                merge(existing, incoming, policy);
            }
            Some(existing) => {
                if policy == MergePolicy::Overwrite {
                    *existing = incoming.clone();
                }
            }
        }
    }
}

/// Fill keys missing from `target` with those of `defaults`
pub fn merge_missing(target: &mut Value, defaults: &Value) {
    merge(target, defaults, MergePolicy::KeepExisting);
}

/// Deep-merge `partial` into `target`, overwriting conflicts
pub fn merge_overwrite(target: &mut Value, partial: &Value) {
    merge(target, partial, MergePolicy::Overwrite);
}

/// Dotted field paths that apply `partial` to a stored copy of `target`
/// the way [`merge_overwrite`] applies it in memory
///
/// Paths descend where both sides hold objects; anything else is written
/// whole.
pub fn overwrite_paths(target: &Value, partial: &Map<String, Value>) -> Map<String, Value> {
    let mut paths = Map::new();
    collect_paths(target, partial, None, &mut paths);
    paths
}

fn collect_paths(
    target: &Value,
    partial: &Map<String, Value>,
    prefix: Option<&str>,
    paths: &mut Map<String, Value>,
) {
    for (key, incoming) in partial {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match (target.get(key), incoming) {
            (Some(existing @ Value::Object(_)), Value::Object(nested)) => {
                collect_paths(existing, nested, Some(&path), paths);
            }
            _ => {
                paths.insert(path, incoming.clone());
            }
        }
    }
}
