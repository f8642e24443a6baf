//! Collections stored inside a parent entity.
//!
//! Some remote objects keep a list of sub-records in one of their fields
//! (a user's authorized keys, say) with no API of their own. The loader
//! reads that list from the parent's working copy; the saver edits it there
//! and saves the parent. The promise handed back settles with the parent's
//! save but carries the element, not the parent, as its result.

use super::{LoadStrategy, SaveStrategy};
use crate::error::{NshError, Result};
use crate::model::{get_path, Entity};
use crate::namespace::EntityNamespace;
use crate::query::Query;
use crate::task::TaskPromise;
use crate::value::json_text;
use serde_json::Value as Json;
use std::sync::{Arc, Weak};

fn parent_of(parent: &Weak<EntityNamespace>) -> Result<Arc<EntityNamespace>> {
    parent
        .upgrade()
        .ok_or_else(|| NshError::Command("parent entity no longer exists".to_string()))
}

/// Rows of the list at `field`, as the parent's working copy holds them.
pub struct FieldLoader {
    parent: Weak<EntityNamespace>,
    field: String,
    key_field: String,
}

impl FieldLoader {
    pub fn new(parent: &Arc<EntityNamespace>, field: &str, key_field: &str) -> Self {
        Self {
            parent: Arc::downgrade(parent),
            field: field.to_string(),
            key_field: key_field.to_string(),
        }
    }

    fn rows(&self, parent: &EntityNamespace) -> Vec<Entity> {
        match get_path(&parent.entity(), &self.field) {
            Some(Json::Array(items)) => items.iter().filter(|i| i.is_object()).cloned().collect(),
            _ => Vec::new(),
        }
    }
}

impl LoadStrategy for FieldLoader {
    fn load(&self, query: &Query) -> Result<Vec<Entity>> {
        let parent = parent_of(&self.parent)?;
        Ok(query.apply(self.rows(&parent)))
    }

    fn snapshot(&self) -> Vec<Entity> {
        self.parent
            .upgrade()
            .map(|parent| self.rows(&parent))
            .unwrap_or_default()
    }

    // The parent's working copy already reflects confirmed changes.
    fn upsert(&self, _entity: &Entity) {}

    fn evict(&self, _key: &str) {}

    fn key_field(&self) -> Option<&str> {
        Some(&self.key_field)
    }
}

/// Writes elements into the parent's list and saves the parent.
pub struct FieldSaver {
    parent: Weak<EntityNamespace>,
    field: String,
    key_field: String,
}

impl FieldSaver {
    pub fn new(parent: &Arc<EntityNamespace>, field: &str, key_field: &str) -> Self {
        Self {
            parent: Arc::downgrade(parent),
            field: field.to_string(),
            key_field: key_field.to_string(),
        }
    }

    fn position(&self, items: &[Json], key: &Json) -> Option<usize> {
        items
            .iter()
            .position(|item| get_path(item, &self.key_field) == Some(key))
    }

    fn missing(&self, key: &Json) -> NshError {
        NshError::not_found(json_text(key), self.field.clone())
    }

    fn save_parent(parent: &Arc<EntityNamespace>, result: Json) -> Result<TaskPromise> {
        Ok(parent.save()?.map(move |_| result))
    }
}

impl SaveStrategy for FieldSaver {
    fn create(&self, entity: &Entity, _extra: &[Json]) -> Result<TaskPromise> {
        let key = get_path(entity, &self.key_field)
            .filter(|k| !k.is_null())
            .cloned()
            .ok_or_else(|| NshError::Command(format!("entity has no {}", self.key_field)))?;
        let parent = parent_of(&self.parent)?;
        parent.edit_list(&self.field, |items| {
            if self.position(items, &key).is_some() {
                return Err(NshError::Command(format!(
                    "{} '{}' already exists",
                    self.field,
                    json_text(&key)
                )));
            }
            items.push(entity.clone());
            Ok(())
        })?;
        Self::save_parent(&parent, entity.clone())
    }

    fn update(&self, key: &Json, entity: &Entity) -> Result<TaskPromise> {
        let parent = parent_of(&self.parent)?;
        parent.edit_list(&self.field, |items| {
            let index = self.position(items, key).ok_or_else(|| self.missing(key))?;
            items[index] = entity.clone();
            Ok(())
        })?;
        Self::save_parent(&parent, entity.clone())
    }

    fn delete(&self, key: &Json, _extra: &[Json]) -> Result<TaskPromise> {
        let parent = parent_of(&self.parent)?;
        parent.edit_list(&self.field, |items| {
            let index = self.position(items, key).ok_or_else(|| self.missing(key))?;
            items.remove(index);
            Ok(())
        })?;
        Self::save_parent(&parent, Json::Null)
    }
}
