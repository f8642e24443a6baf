//! Property mappings.
//!
//! A [`PropertyMapping`] binds a user-facing property name to one or more
//! fields of an entity document. It is a plain descriptor: getter and setter
//! are either a dotted path or a function pointer, and everything else is a
//! flag. Namespaces hold their mappings in a [`PropertySet`], which is the
//! single source of truth for what `show`, `get`, `set`, `create` and the
//! filter stages accept.

use crate::error::{NshError, Result};
use crate::model::{get_path, set_path, Entity};
use crate::value::{coerce, json_text, Value, ValueType};
use std::sync::Arc;

pub type GetFn = fn(&Entity) -> Value;
pub type SetFn = fn(&mut Entity, &Value) -> Result<()>;
pub type ChoicesFn = fn(&Entity) -> Vec<String>;
pub type ConditionFn = fn(&Entity) -> bool;

#[derive(Debug, Clone)]
pub enum Getter {
    Path(String),
    /// Derived value, e.g. `target` rendered from two fields.
    Func(GetFn),
}

#[derive(Debug, Clone)]
pub enum Setter {
    Path(String),
    /// May touch several fields at once.
    Func(SetFn),
    /// Not stored in the entity; passed to the create/delete task instead.
    Argument,
}

#[derive(Debug, Clone)]
pub enum Choices {
    Static(Vec<String>),
    Computed(ChoicesFn),
}

#[derive(Debug, Clone)]
pub struct PropertyMapping {
    pub name: String,
    pub description: String,
    pub getter: Getter,
    /// `None` means read-only.
    pub setter: Option<Setter>,
    pub value_type: ValueType,
    pub choices: Option<Choices>,
    /// Shown as a column by `show` on the collection, and filterable.
    pub list: bool,
    pub usersetable: bool,
    pub createsetable: bool,
    pub create_arg: bool,
    pub delete_arg: bool,
    pub condition: Option<ConditionFn>,
}

impl PropertyMapping {
    /// A string property read from and written to `path`.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            description: String::new(),
            getter: Getter::Path(path.clone()),
            setter: Some(Setter::Path(path)),
            value_type: ValueType::String,
            choices: None,
            list: true,
            usersetable: true,
            createsetable: true,
            create_arg: false,
            delete_arg: false,
            condition: None,
        }
    }

    /// A read-only property computed by a function.
    pub fn derived(name: impl Into<String>, getter: GetFn) -> Self {
        let mut mapping = Self::new(name, String::new());
        mapping.getter = Getter::Func(getter);
        mapping.setter = None;
        mapping
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn typed(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.setter = None;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.list = false;
        self
    }

    pub fn setter_fn(mut self, setter: SetFn) -> Self {
        self.setter = Some(Setter::Func(setter));
        self
    }

    /// Restrict values to a fixed set. Plain strings become enums.
    pub fn choices(mut self, allowed: &[&str]) -> Self {
        self.choices = Some(Choices::Static(allowed.iter().map(|s| s.to_string()).collect()));
        if self.value_type == ValueType::String {
            self.value_type = ValueType::Enum;
        }
        self
    }

    pub fn computed_choices(mut self, choices: ChoicesFn) -> Self {
        self.choices = Some(Choices::Computed(choices));
        if self.value_type == ValueType::String {
            self.value_type = ValueType::Enum;
        }
        self
    }

    pub fn condition(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn not_usersetable(mut self) -> Self {
        self.usersetable = false;
        self
    }

    pub fn not_createsetable(mut self) -> Self {
        self.createsetable = false;
        self
    }

    /// Only accepted by `create`, forwarded as a task argument.
    pub fn create_arg(mut self) -> Self {
        self.setter = Some(Setter::Argument);
        self.create_arg = true;
        self.createsetable = true;
        self.usersetable = false;
        self.list = false;
        self
    }

    /// Only accepted by `delete`, forwarded as a task argument.
    pub fn delete_arg(mut self) -> Self {
        self.setter = Some(Setter::Argument);
        self.delete_arg = true;
        self.createsetable = false;
        self.usersetable = false;
        self.list = false;
        self
    }

    pub fn get(&self, entity: &Entity) -> Value {
        match &self.getter {
            Getter::Func(f) => f(entity),
            Getter::Path(path) => match get_path(entity, path) {
                None => Value::Null,
                Some(json) => Value::from_json(json, self.value_type).unwrap_or_else(|err| {
                    tracing::warn!(property = %self.name, %err, "unexpected value shape");
                    Value::String(json_text(json))
                }),
            },
        }
    }

    /// Allowed values for this entity, if the mapping is choice-constrained.
    pub fn allowed_values(&self, entity: &Entity) -> Option<Vec<String>> {
        match &self.choices {
            None => None,
            Some(Choices::Static(values)) => Some(values.clone()),
            Some(Choices::Computed(f)) => Some(f(entity)),
        }
    }

    pub fn set(&self, entity: &mut Entity, value: &Value) -> Result<()> {
        let setter = self
            .setter
            .as_ref()
            .ok_or_else(|| NshError::ImmutableProperty(self.name.clone()))?;

        if let Some(allowed) = self.allowed_values(entity) {
            let text = value.to_string();
            if !value.is_null() && !allowed.contains(&text) {
                return Err(NshError::InvalidChoice {
                    name: self.name.clone(),
                    value: text,
                    allowed,
                });
            }
        }

        match setter {
            Setter::Path(path) => {
                set_path(entity, path, value.to_json());
                Ok(())
            }
            Setter::Func(f) => f(entity, value),
            Setter::Argument => Err(NshError::Command(format!(
                "Property {} can only be given as a command argument",
                self.name
            ))),
        }
    }

    /// Coerce user text with this mapping's type.
    pub fn coerce(&self, raw: &str) -> Result<Value> {
        coerce(raw, self.value_type)
    }

    pub fn set_raw(&self, entity: &mut Entity, raw: &str) -> Result<()> {
        let value = self.coerce(raw)?;
        self.set(entity, &value)
    }

    pub fn is_applicable(&self, entity: &Entity) -> bool {
        self.condition.map_or(true, |f| f(entity))
    }

    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.setter, Some(Setter::Argument))
    }

    /// The field this property reads, if it is a plain path.
    pub fn field_path(&self) -> Option<&str> {
        match &self.getter {
            Getter::Path(path) => Some(path),
            Getter::Func(_) => None,
        }
    }

    pub fn is_filterable(&self) -> bool {
        self.list && self.field_path().is_some()
    }
}

/// The mappings of one namespace, unique by name, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    mappings: Vec<Arc<PropertyMapping>>,
}

impl PropertySet {
    pub fn new(mappings: Vec<PropertyMapping>) -> Result<Self> {
        let mut set = PropertySet::default();
        for mapping in mappings {
            if set.get(&mapping.name).is_some() {
                return Err(NshError::Definition(format!(
                    "property '{}' declared twice",
                    mapping.name
                )));
            }
            set.mappings.push(Arc::new(mapping));
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PropertyMapping>> {
        self.mappings.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PropertyMapping>> {
        self.mappings.iter()
    }

    pub fn listed(&self) -> impl Iterator<Item = &Arc<PropertyMapping>> {
        self.mappings.iter().filter(|m| m.list)
    }

    pub fn filterable_names(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|m| m.is_filterable())
            .map(|m| m.name.clone())
            .collect()
    }

    /// Look up a property usable in a filter or sort stage.
    pub fn filterable(&self, name: &str) -> Result<&Arc<PropertyMapping>> {
        self.get(name)
            .filter(|m| m.is_filterable())
            .ok_or_else(|| NshError::UnknownProperty {
                name: name.to_string(),
                valid: self.filterable_names(),
            })
    }

    /// Look up any property by name, listing every known name on failure.
    pub fn require(&self, name: &str) -> Result<&Arc<PropertyMapping>> {
        self.get(name).ok_or_else(|| NshError::UnknownProperty {
            name: name.to_string(),
            valid: self.mappings.iter().map(|m| m.name.clone()).collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// A property that must be supplied on create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    One(String),
    /// Any one of the alternatives satisfies the requirement.
    AnyOf(Vec<String>),
}

impl Requirement {
    pub fn one(name: &str) -> Self {
        Requirement::One(name.to_string())
    }

    pub fn any_of(names: &[&str]) -> Self {
        Requirement::AnyOf(names.iter().map(|s| s.to_string()).collect())
    }

    pub fn is_met(&self, provided: impl Fn(&str) -> bool) -> bool {
        match self {
            Requirement::One(name) => provided(name),
            Requirement::AnyOf(names) => names.iter().any(|n| provided(n)),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Requirement::One(name) => name.clone(),
            Requirement::AnyOf(names) => names.join("|"),
        }
    }
}

/// Labels of every requirement not met by `provided`.
pub fn missing_requirements(
    requirements: &[Requirement],
    provided: impl Fn(&str) -> bool,
) -> Vec<String> {
    requirements
        .iter()
        .filter(|r| !r.is_met(&provided))
        .map(Requirement::label)
        .collect()
}
