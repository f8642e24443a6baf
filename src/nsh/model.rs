//! Entity documents.
//!
//! Entities are kept exactly as the remote store delivers them: JSON objects.
//! Property mappings address fields with dotted paths (`target.path`), and
//! the helpers here are the only code that walks those paths.

use crate::value::json_text;
use serde_json::{Map, Value as Json};

pub type Entity = Json;

/// Follow a dotted path. Missing keys and non-object intermediates yield `None`.
pub fn get_path<'a>(entity: &'a Entity, path: &str) -> Option<&'a Entity> {
    path.split('.')
        .try_fold(entity, |current, segment| current.as_object()?.get(segment))
}

/// Assign along a dotted path, creating intermediate objects as needed.
pub fn set_path(entity: &mut Entity, path: &str, value: Json) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(entity, &segments, value);
}

fn set_segments(target: &mut Json, segments: &[&str], value: Json) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Json::Object(map) = target {
        let slot = map.entry(first.to_string()).or_insert(Json::Null);
        set_segments(slot, rest, value);
    }
}

/// Remove the value at a dotted path, returning it.
pub fn remove_path(entity: &mut Entity, path: &str) -> Option<Json> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let container = match parent {
        Some(parent) => parent
            .split('.')
            .try_fold(&mut *entity, |current, segment| current.as_object_mut()?.get_mut(segment))?,
        None => entity,
    };
    container.as_object_mut()?.remove(leaf)
}

/// The value at `field` rendered as a key, or `None` when absent or null.
pub fn key_string(entity: &Entity, field: &str) -> Option<String> {
    get_path(entity, field)
        .filter(|v| !v.is_null())
        .map(json_text)
}

/// Deep-merge `source` into `target`. Objects merge key by key; anything else
/// replaces.
pub fn merge(target: &mut Entity, source: &Entity) {
    match (target, source) {
        (Json::Object(into), Json::Object(from)) => {
            for (key, value) in from {
                match into.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value)
                    }
                    _ => {
                        into.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_walks_nested_objects() {
        let entity = json!({"name": "data", "target": {"path": "/mnt/data", "type": "DATASET"}});
        assert_eq!(get_path(&entity, "name"), Some(&json!("data")));
        assert_eq!(get_path(&entity, "target.type"), Some(&json!("DATASET")));
        assert_eq!(get_path(&entity, "target.missing"), None);
        assert_eq!(get_path(&entity, "name.deeper"), None);
    }

    #[test]
    fn set_path_creates_intermediates() {
        let mut entity = json!({"name": "x"});
        set_path(&mut entity, "properties.owner.name", json!("root"));
        assert_eq!(entity["properties"]["owner"]["name"], json!("root"));

        set_path(&mut entity, "name", json!("y"));
        assert_eq!(entity["name"], json!("y"));
    }

    #[test]
    fn set_path_replaces_scalar_intermediates() {
        let mut entity = json!({"target": "flat"});
        set_path(&mut entity, "target.path", json!("/mnt"));
        assert_eq!(entity, json!({"target": {"path": "/mnt"}}));
    }

    #[test]
    fn remove_path_returns_removed_value() {
        let mut entity = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove_path(&mut entity, "a.b"), Some(json!(1)));
        assert_eq!(entity, json!({"a": {"c": 2}}));
        assert_eq!(remove_path(&mut entity, "a.zzz"), None);
    }

    #[test]
    fn key_string_skips_null() {
        let entity = json!({"id": 7, "name": null});
        assert_eq!(key_string(&entity, "id"), Some("7".to_string()));
        assert_eq!(key_string(&entity, "name"), None);
    }

    #[test]
    fn merge_is_deep_for_objects() {
        let mut target = json!({"name": "a", "props": {"x": 1, "y": 2}});
        merge(&mut target, &json!({"props": {"y": 3}, "id": 4}));
        assert_eq!(target, json!({"name": "a", "props": {"x": 1, "y": 3}, "id": 4}));
    }
}
