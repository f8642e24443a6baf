//! A single entity of a collection, and its edit lifecycle.
//!
//! ```text
//! Clean --set--> Dirty --save--> Saving --ok-----> Clean
//!   ^              |                   \--failed--> Dirty
//!   +----revert----+
//! ```
//!
//! Edits are applied to a working copy. The last confirmed state is kept
//! next to it, so `revert` can restore it and a failed save keeps the edits.
//!
//! An entity may have sub-namespaces of its own, built by its collection's
//! entity-child factories the first time they are listed.

use super::collection::CollectionNamespace;
use super::Namespace;
use crate::error::{NshError, Result};
use crate::model::{get_path, key_string, merge, set_path, Entity};
use crate::output::ObjectItem;
use crate::task::{lock, TaskPromise, TaskRecord, TaskStatus};
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::sync::{Arc, Mutex, OnceLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Clean,
    Dirty,
    Saving,
}

struct EntityState {
    entity: Entity,
    saved: Entity,
    edit: EditState,
    is_new: bool,
    /// Create arguments, sent next to the entity instead of inside it.
    args: Map<String, Json>,
    last_error: Option<String>,
}

pub struct EntityNamespace {
    collection: Weak<CollectionNamespace>,
    state: Mutex<EntityState>,
    children: OnceLock<Vec<Namespace>>,
}

impl EntityNamespace {
    pub(crate) fn existing(collection: Weak<CollectionNamespace>, entity: Entity) -> Arc<Self> {
        Self::with_state(collection, entity, false)
    }

    pub(crate) fn new_entity(collection: Weak<CollectionNamespace>, skeleton: Entity) -> Arc<Self> {
        Self::with_state(collection, skeleton, true)
    }

    fn with_state(
        collection: Weak<CollectionNamespace>,
        entity: Entity,
        is_new: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            collection,
            state: Mutex::new(EntityState {
                saved: entity.clone(),
                entity,
                edit: if is_new { EditState::Dirty } else { EditState::Clean },
                is_new,
                args: Map::new(),
                last_error: None,
            }),
            children: OnceLock::new(),
        })
    }

    pub fn collection(&self) -> Result<Arc<CollectionNamespace>> {
        self.collection
            .upgrade()
            .ok_or_else(|| NshError::Command("entity no longer belongs to a collection".to_string()))
    }

    /// Primary-key value of the confirmed state.
    pub fn name(&self) -> String {
        let Ok(collection) = self.collection() else {
            return String::new();
        };
        let state = lock(&self.state);
        let source = if state.is_new { &state.entity } else { &state.saved };
        key_string(source, collection.primary_key()).unwrap_or_default()
    }

    pub(crate) fn key(&self, field: &str) -> Option<String> {
        key_string(&lock(&self.state).saved, field)
    }

    /// Working copy, including unsaved edits.
    pub fn entity(&self) -> Entity {
        lock(&self.state).entity.clone()
    }

    pub fn saved(&self) -> Entity {
        lock(&self.state).saved.clone()
    }

    pub fn edit_state(&self) -> EditState {
        lock(&self.state).edit
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    pub fn is_new(&self) -> bool {
        lock(&self.state).is_new
    }

    /// Sub-namespaces parameterized by this entity. Built once and kept, so
    /// their own cached entities survive re-resolution.
    pub fn children(self: &Arc<Self>) -> Vec<Namespace> {
        self.children
            .get_or_init(|| {
                let Ok(collection) = self.collection() else {
                    return Vec::new();
                };
                let children: Vec<Namespace> = collection
                    .entity_children()
                    .iter()
                    .filter_map(|factory| match factory(self) {
                        Ok(child) => Some(child),
                        Err(err) => {
                            tracing::warn!(entity = %self.name(), error = %err, "sub-namespace skipped");
                            None
                        }
                    })
                    .collect();
                children
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let collection = self.collection()?;
        let mapping = collection.properties().require(name)?;
        let entity = self.entity();
        Ok(if mapping.is_applicable(&entity) {
            mapping.get(&entity)
        } else {
            Value::Null
        })
    }

    pub fn items(&self) -> Result<Vec<ObjectItem>> {
        let collection = self.collection()?;
        let entity = self.entity();
        Ok(collection
            .properties()
            .iter()
            .filter(|m| !m.is_argument() && m.is_applicable(&entity))
            .map(|m| ObjectItem {
                name: m.name.clone(),
                description: m.description.clone(),
                value: m.get(&entity),
                editable: !m.is_read_only() && m.usersetable,
            })
            .collect())
    }

    pub fn set(&self, name: &str, raw: &str) -> Result<()> {
        self.set_many(&[(name.to_string(), raw.to_string())])
    }

    /// Apply several edits. Either all of them land or none does.
    pub fn set_many(&self, kwargs: &[(String, String)]) -> Result<()> {
        let collection = self.collection()?;
        let properties = collection.properties();

        let mut state = lock(&self.state);
        if state.edit == EditState::Saving {
            return Err(NshError::Command(format!(
                "{} is being saved, wait for the task to finish",
                collection.name()
            )));
        }

        let mut working = state.entity.clone();
        let mut args = state.args.clone();
        for (name, raw) in kwargs {
            let mapping = properties.require(name)?;
            let settable = if state.is_new {
                mapping.createsetable
            } else {
                mapping.usersetable
            };
            if mapping.is_read_only() || !settable {
                return Err(NshError::ImmutableProperty(name.clone()));
            }
            if !mapping.is_applicable(&working) {
                return Err(NshError::Command(format!(
                    "Property {} does not apply to this {}",
                    name,
                    collection.name()
                )));
            }

            if mapping.is_argument() {
                args.insert(name.clone(), mapping.coerce(raw)?.to_json());
            } else {
                mapping.set_raw(&mut working, raw)?;
            }
        }

        state.entity = working;
        state.args = args;
        state.edit = if !state.is_new && state.entity == state.saved {
            EditState::Clean
        } else {
            EditState::Dirty
        };
        Ok(())
    }

    /// Edit the list held at `field` of the working copy directly, without
    /// going through property mappings. Collections stored inside this
    /// entity write through here.
    pub(crate) fn edit_list(
        &self,
        field: &str,
        edit: impl FnOnce(&mut Vec<Json>) -> Result<()>,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        if state.edit == EditState::Saving {
            return Err(NshError::Command(format!(
                "cannot change {} while the entity is being saved",
                field
            )));
        }

        let mut items = match get_path(&state.entity, field) {
            Some(Json::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        edit(&mut items)?;
        set_path(&mut state.entity, field, Json::Array(items));
        state.edit = if !state.is_new && state.entity == state.saved {
            EditState::Clean
        } else {
            EditState::Dirty
        };
        Ok(())
    }

    pub fn revert(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.edit == EditState::Saving {
            return Err(NshError::Command("cannot revert while saving".to_string()));
        }
        state.entity = state.saved.clone();
        state.args.clear();
        if !state.is_new {
            state.edit = EditState::Clean;
        }
        Ok(())
    }

    /// Submit the working copy. A clean entity resolves immediately.
    pub fn save(self: &Arc<Self>) -> Result<TaskPromise> {
        let collection = self.collection()?;
        let saver = collection.saver()?.clone();

        let (entity, is_new, args, key) = {
            let mut state = lock(&self.state);
            match state.edit {
                EditState::Saving => {
                    return Err(NshError::Command("a save is already in progress".to_string()))
                }
                EditState::Clean if !state.is_new => {
                    return Ok(TaskPromise::resolved("save", Ok(state.entity.clone())));
                }
                _ => {}
            }
            state.edit = EditState::Saving;
            state.last_error = None;
            let key = get_path(&state.saved, collection.save_key()).cloned();
            (state.entity.clone(), state.is_new, state.args.clone(), key)
        };

        let submitted = if is_new {
            let extra: Vec<Json> = if args.is_empty() {
                Vec::new()
            } else {
                vec![Json::Object(args)]
            };
            saver.create(&entity, &extra)
        } else {
            match key {
                Some(key) => saver.update(&key, &entity),
                None => Err(NshError::Command(format!(
                    "entity has no {} to save by",
                    collection.save_key()
                ))),
            }
        };

        let promise = match submitted {
            Ok(promise) => promise,
            Err(err) => {
                let mut state = lock(&self.state);
                state.edit = EditState::Dirty;
                state.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let me = self.clone();
        promise.on_complete(move |record| me.finish_save(record));
        Ok(promise)
    }

    fn finish_save(self: &Arc<Self>, record: &TaskRecord) {
        let confirmed = {
            let mut state = lock(&self.state);
            if record.status != TaskStatus::Finished {
                tracing::warn!(task = record.id, error = ?record.error, "save failed, edits kept");
                state.edit = EditState::Dirty;
                state.last_error = Some(
                    record
                        .error
                        .clone()
                        .unwrap_or_else(|| record.status.to_string()),
                );
                return;
            }

            if let Some(result) = record.result.as_ref().filter(|r| r.is_object()) {
                merge(&mut state.entity, result);
            }
            state.saved = state.entity.clone();
            state.edit = EditState::Clean;
            state.is_new = false;
            state.args.clear();
            state.saved.clone()
        };

        if let Ok(collection) = self.collection() {
            collection.loader().upsert(&confirmed);
            collection.adopt(self.clone());
        }
    }

    /// Submit deletion. `kwargs` may only name delete arguments.
    pub fn delete(self: &Arc<Self>, kwargs: &[(String, String)]) -> Result<TaskPromise> {
        let collection = self.collection()?;
        let saver = collection.saver()?.clone();
        let extra = collection.delete_args(kwargs)?;

        let key = {
            let state = lock(&self.state);
            if state.is_new {
                return Err(NshError::Command("entity has not been saved".to_string()));
            }
            get_path(&state.saved, collection.save_key())
                .cloned()
                .ok_or_else(|| {
                    NshError::Command(format!("entity has no {} to delete by", collection.save_key()))
                })?
        };

        let extra: Vec<Json> = if extra.is_empty() {
            Vec::new()
        } else {
            vec![Json::Object(extra)]
        };
        let promise = saver.delete(&key, &extra)?;

        let me = self.clone();
        promise.on_complete(move |record| {
            if record.status == TaskStatus::Finished {
                if let Ok(collection) = me.collection() {
                    let key = crate::value::json_text(&key);
                    collection.loader().evict(&key);
                    collection.forget(&key);
                }
            } else {
                lock(&me.state).last_error = record.error.clone();
            }
        });
        Ok(promise)
    }

    /// Take a freshly loaded version of this entity.
    pub(crate) fn refresh(&self, entity: &Entity) {
        let mut state = lock(&self.state);
        match state.edit {
            EditState::Clean => {
                state.entity = entity.clone();
                state.saved = entity.clone();
            }
            EditState::Dirty => state.saved = entity.clone(),
            EditState::Saving => {}
        }
    }
}

impl std::fmt::Debug for EntityNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityNamespace")
            .field("name", &self.name())
            .field("edit", &self.edit_state())
            .finish()
    }
}
