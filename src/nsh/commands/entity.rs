//! Standard commands of collections and entities.

use super::{Command, CommandTable, Invocation};
use crate::error::{NshError, Result};
use crate::namespace::{CollectionNamespace, EntityNamespace, Namespace};
use crate::output::{Output, Table};
use crate::session::Session;
use std::sync::Arc;

fn collection_of<'a>(
    target: &'a Namespace,
    command: &str,
) -> Result<&'a Arc<CollectionNamespace>> {
    target.as_collection().ok_or_else(|| {
        NshError::Command(format!("{}: {} is not a collection", command, target.name()))
    })
}

pub(crate) fn entity_of<'a>(
    target: &'a Namespace,
    command: &str,
) -> Result<&'a Arc<EntityNamespace>> {
    target.as_entity().ok_or_else(|| {
        NshError::Command(format!("{}: {} is not an entity", command, target.name()))
    })
}

pub fn collection_commands(writable: bool) -> CommandTable {
    let table = CommandTable::new().with("show", ShowCollection);
    if writable {
        table.with("create", CreateEntity).with("delete", DeleteCollectionEntity)
    } else {
        table
    }
}

pub fn entity_commands(writable: bool) -> CommandTable {
    let table = CommandTable::new()
        .with("show", ShowEntity)
        .with("get", GetProperty);
    if writable {
        table
            .with("set", SetProperty)
            .with("save", Save)
            .with("revert", Revert)
            .with("delete", DeleteEntity)
    } else {
        table
    }
}

/// Lists entities as a table, handing the folded query to the loader.
pub struct ShowCollection;

impl Command for ShowCollection {
    fn description(&self) -> &str {
        "List entities"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let collection = collection_of(target, "show")?;
        inv.max_args(0, "show")?;
        let rows = collection.load(&inv.query)?;
        Ok(Output::Table(Table::from_properties(collection.properties(), rows)))
    }

    fn consumes_query(&self) -> bool {
        true
    }
}

pub struct CreateEntity;

impl Command for CreateEntity {
    fn description(&self) -> &str {
        "Create a new entity"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let collection = collection_of(target, "create")?;
        inv.max_args(1, "create [<name>] <property>=<value> ...")?;

        let mut kwargs = Vec::with_capacity(inv.kwargs.len() + 1);
        if let Some(name) = inv.arg(0) {
            let key = collection
                .properties()
                .iter()
                .find(|m| m.field_path() == Some(collection.primary_key()))
                .ok_or_else(|| {
                    NshError::Definition(format!(
                        "{} has no property for {}",
                        collection.name(),
                        collection.primary_key()
                    ))
                })?;
            kwargs.push((key.name.clone(), name.to_string()));
        }
        kwargs.extend(inv.kwargs.iter().cloned());

        Ok(Output::Task(collection.create(&kwargs)?))
    }
}

pub struct DeleteCollectionEntity;

impl Command for DeleteCollectionEntity {
    fn description(&self) -> &str {
        "Delete an entity by name"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let collection = collection_of(target, "delete")?;
        inv.expect_args(1, "delete <name>")?;
        let name = inv.arg(0).unwrap_or_default();
        let entity = collection
            .find(name)
            .ok_or_else(|| NshError::not_found(name, collection.name()))?;
        Ok(Output::Task(entity.delete(&inv.kwargs)?))
    }
}

pub struct ShowEntity;

impl Command for ShowEntity {
    fn description(&self) -> &str {
        "Show all properties"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "show")?;
        inv.max_args(0, "show")?;
        Ok(Output::Object(entity.items()?))
    }
}

pub struct GetProperty;

impl Command for GetProperty {
    fn description(&self) -> &str {
        "Print one property"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "get")?;
        inv.expect_args(1, "get <property>")?;
        Ok(Output::Value(entity.get(inv.arg(0).unwrap_or_default())?))
    }
}

/// Edits properties; saves right away when `autosave` is on.
pub struct SetProperty;

impl Command for SetProperty {
    fn description(&self) -> &str {
        "Set properties"
    }

    fn run(&self, session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "set")?;
        if inv.kwargs.is_empty() || !inv.args.is_empty() {
            return Err(NshError::Arity("set <property>=<value> ...".to_string()));
        }
        entity.set_many(&inv.kwargs)?;

        if session.variables().flag("autosave") {
            return Ok(Output::Task(entity.save()?));
        }
        Ok(Output::None)
    }
}

pub struct Save;

impl Command for Save {
    fn description(&self) -> &str {
        "Save pending changes"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "save")?;
        inv.max_args(0, "save")?;
        Ok(Output::Task(entity.save()?))
    }
}

pub struct Revert;

impl Command for Revert {
    fn description(&self) -> &str {
        "Discard pending changes"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "revert")?;
        inv.max_args(0, "revert")?;
        entity.revert()?;
        Ok(Output::None)
    }
}

pub struct DeleteEntity;

impl Command for DeleteEntity {
    fn description(&self) -> &str {
        "Delete this entity"
    }

    fn run(&self, session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        let entity = entity_of(target, "delete")?;
        inv.max_args(0, "delete [<argument>=<value> ...]")?;
        let promise = entity.delete(&inv.kwargs)?;
        if session.cwd().same(target) {
            session.cd_up();
        }
        Ok(Output::Task(promise))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::EditState;
    use crate::test_utils::Fixture;
    use crate::value::Value;
    use serde_json::json;

    fn user_ns(fx: &Fixture, name: &str) -> Namespace {
        fx.load_users();
        Namespace::Entity(fx.users().find(name).unwrap())
    }

    #[test]
    fn show_collection_returns_listed_columns() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let users = Namespace::Collection(fx.users());
        let Output::Table(table) = ShowCollection
            .run(&mut session, &users, &Invocation::default())
            .unwrap()
        else {
            panic!("expected a table");
        };
        assert_eq!(table.len(), 3);
        assert!(table.column("username").is_some());
        assert!(table.column("delete_home").is_none());
    }

    #[test]
    fn create_maps_positional_name_to_primary_key() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let users = Namespace::Collection(fx.users());
        let inv = Invocation {
            args: vec!["erin".into()],
            kwargs: vec![("uid".into(), "1010".into())],
            ..Default::default()
        };
        let Output::Task(promise) = CreateEntity.run(&mut session, &users, &inv).unwrap() else {
            panic!("expected a task");
        };
        promise.wait(None).unwrap();
        let rows = fx.remote.rows("account.user");
        assert!(rows.iter().any(|u| u["username"] == json!("erin") && u["uid"] == json!(1010)));
    }

    #[test]
    fn get_requires_exactly_one_property() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let root = user_ns(&fx, "root");
        let err = GetProperty
            .run(&mut session, &root, &Invocation::default())
            .unwrap_err();
        assert!(matches!(err, NshError::Arity(_)));

        let out = GetProperty
            .run(&mut session, &root, &Invocation::with_args(&["uid"]))
            .unwrap();
        assert!(matches!(out, Output::Value(Value::Number(0))));
    }

    #[test]
    fn set_without_autosave_leaves_entity_dirty() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let root = user_ns(&fx, "root");
        let inv = Invocation {
            kwargs: vec![("full_name".into(), "Charlie Root".into())],
            ..Default::default()
        };
        let out = SetProperty.run(&mut session, &root, &inv).unwrap();
        assert!(out.is_none());
        assert_eq!(root.as_entity().unwrap().edit_state(), EditState::Dirty);
    }

    #[test]
    fn set_with_autosave_submits() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.set_variable("autosave", "yes").unwrap();
        let root = user_ns(&fx, "root");
        let inv = Invocation {
            kwargs: vec![("full_name".into(), "Charlie Root".into())],
            ..Default::default()
        };
        let Output::Task(promise) = SetProperty.run(&mut session, &root, &inv).unwrap() else {
            panic!("expected a task");
        };
        promise.wait(None).unwrap();
        assert_eq!(root.as_entity().unwrap().edit_state(), EditState::Clean);
    }

    #[test]
    fn delete_by_name_from_collection() {
        let fx = Fixture::new();
        let mut session = fx.session();
        fx.load_users();
        let users = Namespace::Collection(fx.users());

        let err = DeleteCollectionEntity
            .run(&mut session, &users, &Invocation::with_args(&["nobody"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "'nobody' not found in user");

        let Output::Task(promise) = DeleteCollectionEntity
            .run(&mut session, &users, &Invocation::with_args(&["alice"]))
            .unwrap()
        else {
            panic!("expected a task");
        };
        promise.wait(None).unwrap();
        assert!(fx.users().find("alice").is_none());
    }

    #[test]
    fn deleting_current_entity_moves_up() {
        let fx = Fixture::new();
        let mut session = fx.session();
        fx.load_users();
        session.navigate("account/user/alice").unwrap();
        let target = session.cwd().clone();

        DeleteEntity
            .run(&mut session, &target, &Invocation::default())
            .unwrap();
        assert_eq!(session.path_string(), "/account/user");
    }
}
