use super::entity::EntityNamespace;
use super::Namespace;
use crate::commands::entity as std_commands;
use crate::commands::{Command, CommandTable};
use crate::error::{NshError, Result};
use crate::model::{key_string, Entity};
use crate::property::{missing_requirements, PropertyMapping, PropertySet, Requirement};
use crate::query::Query;
use crate::store::{LoadStrategy, SaveStrategy};
use crate::task::{lock, TaskPromise};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Builds one sub-namespace for a given entity of a collection.
pub type EntityChild = Arc<dyn Fn(&Arc<EntityNamespace>) -> Result<Namespace> + Send + Sync>;

/// A set of remote entities.
///
/// Entity namespaces are cached by save key so that an entity with unsaved
/// edits is the same instance every time it is resolved.
pub struct CollectionNamespace {
    name: String,
    description: String,
    properties: PropertySet,
    primary_key: String,
    save_key: String,
    required: Vec<Requirement>,
    skeleton: Entity,
    loader: Arc<dyn LoadStrategy>,
    saver: Option<Arc<dyn SaveStrategy>>,
    children: Vec<Namespace>,
    entity_children: Vec<EntityChild>,
    commands: CommandTable,
    entity_commands: CommandTable,
    entities: Mutex<Vec<Arc<EntityNamespace>>>,
    me: Weak<CollectionNamespace>,
}

impl CollectionNamespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn save_key(&self) -> &str {
        &self.save_key
    }

    pub fn required(&self) -> &[Requirement] {
        &self.required
    }

    pub fn children(&self) -> &[Namespace] {
        &self.children
    }

    pub(crate) fn entity_children(&self) -> &[EntityChild] {
        &self.entity_children
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn entity_commands(&self) -> &CommandTable {
        &self.entity_commands
    }

    pub fn loader(&self) -> &Arc<dyn LoadStrategy> {
        &self.loader
    }

    pub fn is_read_only(&self) -> bool {
        self.saver.is_none()
    }

    pub fn saver(&self) -> Result<&Arc<dyn SaveStrategy>> {
        self.saver
            .as_ref()
            .ok_or_else(|| NshError::Command(format!("{} is read-only", self.name)))
    }

    pub fn load(&self, query: &Query) -> Result<Vec<Entity>> {
        tracing::debug!(collection = %self.name, ?query, "load");
        self.loader.load(query)
    }

    /// Entity namespaces for the latest snapshot, reusing cached instances.
    pub fn entities(&self) -> Vec<Arc<EntityNamespace>> {
        let snapshot = self.loader.snapshot();
        let mut cache = lock(&self.entities);
        let mut next = Vec::with_capacity(snapshot.len());

        for entity in snapshot {
            let Some(key) = key_string(&entity, &self.save_key) else {
                tracing::warn!(collection = %self.name, "entity without {} skipped", self.save_key);
                continue;
            };
            match cache
                .iter()
                .find(|cached| cached.key(&self.save_key).as_deref() == Some(&key))
            {
                Some(cached) => {
                    cached.refresh(&entity);
                    next.push(cached.clone());
                }
                None => next.push(EntityNamespace::existing(self.me.clone(), entity)),
            }
        }

        *cache = next.clone();
        next
    }

    pub fn find(&self, name: &str) -> Option<Arc<EntityNamespace>> {
        self.entities().into_iter().find(|e| e.name() == name)
    }

    /// Build a new entity from the skeleton and `kwargs`, and submit it.
    pub fn create(&self, kwargs: &[(String, String)]) -> Result<TaskPromise> {
        self.saver()?;

        let missing = missing_requirements(&self.required, |name| {
            kwargs.iter().any(|(key, _)| key == name)
        });
        if !missing.is_empty() {
            return Err(NshError::MissingRequiredProperty(missing));
        }

        let entity = EntityNamespace::new_entity(self.me.clone(), self.skeleton.clone());
        entity.set_many(kwargs)?;
        entity.save()
    }

    /// Collect `delete` arguments into the extra task argument.
    pub(crate) fn delete_args(&self, kwargs: &[(String, String)]) -> Result<Map<String, Json>> {
        let mut extra = Map::new();
        for (name, raw) in kwargs {
            let mapping = self
                .properties
                .get(name)
                .filter(|m| m.delete_arg)
                .ok_or_else(|| NshError::UnknownProperty {
                    name: name.clone(),
                    valid: self
                        .properties
                        .iter()
                        .filter(|m| m.delete_arg)
                        .map(|m| m.name.clone())
                        .collect(),
                })?;
            extra.insert(name.clone(), mapping.coerce(raw)?.to_json());
        }
        Ok(extra)
    }

    pub(crate) fn adopt(&self, entity: Arc<EntityNamespace>) {
        let mut cache = lock(&self.entities);
        if !cache.iter().any(|cached| Arc::ptr_eq(cached, &entity)) {
            cache.push(entity);
        }
    }

    pub(crate) fn forget(&self, key: &str) {
        lock(&self.entities).retain(|cached| cached.key(&self.save_key).as_deref() != Some(key));
    }
}

impl fmt::Debug for CollectionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionNamespace")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("save_key", &self.save_key)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

pub struct CollectionBuilder {
    name: String,
    description: String,
    properties: Vec<PropertyMapping>,
    primary_key: String,
    save_key: Option<String>,
    required: Vec<Requirement>,
    skeleton: Entity,
    loader: Option<Arc<dyn LoadStrategy>>,
    saver: Option<Arc<dyn SaveStrategy>>,
    children: Vec<Namespace>,
    entity_children: Vec<EntityChild>,
    commands: Vec<(String, Arc<dyn Command>)>,
    entity_commands: Vec<(String, Arc<dyn Command>)>,
}

impl CollectionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            properties: Vec::new(),
            primary_key: "name".to_string(),
            save_key: None,
            required: Vec::new(),
            skeleton: Json::Object(Map::new()),
            loader: None,
            saver: None,
            children: Vec::new(),
            entity_children: Vec::new(),
            commands: Vec::new(),
            entity_commands: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn property(mut self, mapping: PropertyMapping) -> Self {
        self.properties.push(mapping);
        self
    }

    /// Field whose value names entities in paths.
    pub fn primary_key(mut self, field: &str) -> Self {
        self.primary_key = field.to_string();
        self
    }

    /// Field used to address updates and deletes. Defaults to the primary key.
    pub fn save_key(mut self, field: &str) -> Self {
        self.save_key = Some(field.to_string());
        self
    }

    pub fn require(mut self, requirement: Requirement) -> Self {
        self.required.push(requirement);
        self
    }

    /// Starting document for `create`.
    pub fn skeleton(mut self, skeleton: Entity) -> Self {
        self.skeleton = skeleton;
        self
    }

    pub fn loader(mut self, loader: impl LoadStrategy + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn saver(mut self, saver: impl SaveStrategy + 'static) -> Self {
        self.saver = Some(Arc::new(saver));
        self
    }

    pub fn child(mut self, namespace: Namespace) -> Self {
        self.children.push(namespace);
        self
    }

    /// Give every entity a sub-namespace built by `factory`.
    pub fn entity_child(
        mut self,
        factory: impl Fn(&Arc<EntityNamespace>) -> Result<Namespace> + Send + Sync + 'static,
    ) -> Self {
        self.entity_children.push(Arc::new(factory));
        self
    }

    pub fn command(mut self, name: &str, command: impl Command + 'static) -> Self {
        self.commands.push((name.to_string(), Arc::new(command)));
        self
    }

    pub fn entity_command(mut self, name: &str, command: impl Command + 'static) -> Self {
        self.entity_commands.push((name.to_string(), Arc::new(command)));
        self
    }

    pub fn build(self) -> Result<Namespace> {
        let loader = self.loader.ok_or_else(|| {
            NshError::Definition(format!("collection '{}' has no load strategy", self.name))
        })?;
        let properties = PropertySet::new(self.properties)?;

        for requirement in &self.required {
            let names = match requirement {
                Requirement::One(name) => std::slice::from_ref(name),
                Requirement::AnyOf(names) => names.as_slice(),
            };
            if let Some(unknown) = names.iter().find(|n| properties.get(n).is_none()) {
                return Err(NshError::Definition(format!(
                    "collection '{}' requires unknown property '{}'",
                    self.name, unknown
                )));
            }
        }

        let writable = self.saver.is_some();
        let mut commands = std_commands::collection_commands(writable);
        for (name, command) in self.commands {
            commands.insert(&name, command);
        }
        let mut entity_commands = std_commands::entity_commands(writable);
        for (name, command) in self.entity_commands {
            entity_commands.insert(&name, command);
        }

        let save_key = self.save_key.unwrap_or_else(|| self.primary_key.clone());
        if let Some(key_field) = loader.key_field() {
            if key_field != save_key {
                return Err(NshError::Definition(format!(
                    "collection '{}' saves by '{}' but its loader keys rows by '{}'",
                    self.name, save_key, key_field
                )));
            }
        }
        let collection = Arc::new_cyclic(|me| CollectionNamespace {
            name: self.name,
            description: self.description,
            properties,
            primary_key: self.primary_key,
            save_key,
            required: self.required,
            skeleton: self.skeleton,
            loader,
            saver: self.saver,
            children: self.children,
            entity_children: self.entity_children,
            commands,
            entity_commands,
            entities: Mutex::new(Vec::new()),
            me: me.clone(),
        });
        Ok(Namespace::Collection(collection))
    }
}
