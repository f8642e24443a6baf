//! File shares.
//!
//! All shares live in one remote collection and reach the shell through a
//! live feed. `share` lists every share read-only; `share/nfs` and
//! `share/smb` are the same feed narrowed by type, with create/edit/delete.

use crate::commands::entity::entity_of;
use crate::commands::{Command, Invocation};
use crate::error::Result;
use crate::feed::EntityFeed;
use crate::model::{get_path, set_path, Entity};
use crate::namespace::{CollectionBuilder, Namespace};
use crate::output::{Output, Table};
use crate::property::{PropertyMapping, PropertySet, Requirement};
use crate::query::{Operator, Predicate};
use crate::remote::Connection;
use crate::session::Session;
use crate::store::load::FeedLoader;
use crate::store::save::TaskSaver;
use crate::value::{json_text, Value, ValueType};
use serde_json::{json, Value as Json};
use std::sync::Arc;

pub const CLIENTS_METHOD: &str = "share.get_connected_clients";

fn share_type(entity: &Entity) -> String {
    get_path(entity, "type").map(json_text).unwrap_or_default()
}

fn is_nfs(entity: &Entity) -> bool {
    share_type(entity) == "nfs"
}

fn is_smb(entity: &Entity) -> bool {
    share_type(entity) == "smb"
}

fn target(entity: &Entity) -> Value {
    match get_path(entity, "target_path") {
        None => Value::Null,
        Some(path) => {
            let kind = get_path(entity, "target_type").map(json_text).unwrap_or_default();
            Value::String(format!("{} ({})", json_text(path), kind))
        }
    }
}

fn set_target(entity: &mut Entity, value: &Value, kind: &str) {
    set_path(entity, "target_path", value.to_json());
    set_path(entity, "target_type", json!(kind));
}

fn set_dataset(entity: &mut Entity, value: &Value) -> Result<()> {
    set_target(entity, value, "DATASET");
    Ok(())
}

fn set_directory(entity: &mut Entity, value: &Value) -> Result<()> {
    set_target(entity, value, "DIRECTORY");
    Ok(())
}

fn security_choices(entity: &Entity) -> Vec<String> {
    let choices: &[&str] = if is_smb(entity) {
        &["user", "domain"]
    } else {
        &["sys", "krb5", "krb5i", "krb5p"]
    };
    choices.iter().map(|c| c.to_string()).collect()
}

fn common() -> Vec<PropertyMapping> {
    vec![
        PropertyMapping::new("id", "id")
            .typed(ValueType::Number)
            .read_only(),
        PropertyMapping::new("name", "name").describe("Share name"),
        PropertyMapping::new("type", "type")
            .describe("Protocol")
            .choices(&["nfs", "smb"])
            .read_only(),
        PropertyMapping::derived("target", target).describe("Shared dataset or directory"),
        PropertyMapping::new("enabled", "enabled")
            .describe("Share is active")
            .typed(ValueType::Boolean),
    ]
}

fn editable() -> Vec<PropertyMapping> {
    vec![
        PropertyMapping::new("dataset", "target_path")
            .describe("Share an existing dataset")
            .setter_fn(set_dataset)
            .hidden(),
        PropertyMapping::new("path", "target_path")
            .describe("Share an existing directory")
            .setter_fn(set_directory)
            .hidden(),
        PropertyMapping::new("parent", "parent")
            .describe("Create a new dataset below this one")
            .create_arg(),
        PropertyMapping::new("comment", "comment").describe("Free-form comment"),
        PropertyMapping::new("security", "security")
            .describe("Authentication flavour")
            .computed_choices(security_choices),
        PropertyMapping::new("hosts", "hosts")
            .describe("Allowed hosts")
            .typed(ValueType::Set)
            .condition(is_nfs),
        PropertyMapping::new("guest_ok", "guest_ok")
            .describe("Allow guest access")
            .typed(ValueType::Boolean)
            .condition(is_smb),
        PropertyMapping::new("delete_dataset", "delete_dataset")
            .describe("Destroy the shared dataset too")
            .typed(ValueType::Boolean)
            .delete_arg(),
    ]
}

/// Hosts currently connected to one share.
struct Clients {
    connection: Connection,
}

impl Command for Clients {
    fn description(&self) -> &str {
        "List connected clients"
    }

    fn run(&self, _session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(0, "clients")?;
        let share = entity_of(target, "clients")?;
        let id = get_path(&share.entity(), "id").cloned().unwrap_or(Json::Null);
        let rows = match self.connection.call(CLIENTS_METHOD, &[id])? {
            Json::Array(rows) => rows,
            _ => Vec::new(),
        };
        let columns = PropertySet::new(vec![
            PropertyMapping::new("host", "host").describe("IP address"),
            PropertyMapping::new("user", "user"),
            PropertyMapping::new("connected_at", "connected_at").typed(ValueType::Time),
        ])?;
        Ok(Output::Table(Table::from_properties(&columns, rows)))
    }
}

fn protocol(connection: &Connection, feed: &Arc<EntityFeed>, kind: &str) -> Result<Namespace> {
    let mut builder = CollectionBuilder::new(kind)
        .describe(format!("{} shares", kind.to_uppercase()))
        .primary_key("name")
        .save_key("id")
        .skeleton(json!({"type": kind, "enabled": true}))
        .require(Requirement::one("name"))
        .require(Requirement::any_of(&["parent", "dataset", "path"]))
        .loader(FeedLoader::new(feed.clone()).with_base(vec![Predicate::compare(
            "type",
            Operator::Eq,
            json!(kind),
        )?]))
        .saver(TaskSaver::new(connection.clone(), "share"))
        .entity_command(
            "clients",
            Clients {
                connection: connection.clone(),
            },
        );
    for mapping in common().into_iter().chain(editable()) {
        builder = builder.property(mapping);
    }
    builder.build()
}

pub fn shares(connection: &Connection, feed: Arc<EntityFeed>) -> Result<Namespace> {
    let mut builder = CollectionBuilder::new("share")
        .describe("File shares")
        .primary_key("name")
        .save_key("id")
        .child(protocol(connection, &feed, "nfs")?)
        .child(protocol(connection, &feed, "smb")?)
        .loader(FeedLoader::new(feed));
    for mapping in common() {
        builder = builder.property(mapping);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;

    #[test]
    fn target_renders_path_and_kind() {
        let entity = json!({"target_path": "tank/data", "target_type": "DATASET"});
        assert_eq!(target(&entity).to_string(), "tank/data (DATASET)");
        assert_eq!(target(&json!({})), Value::Null);
    }

    #[test]
    fn path_and_dataset_set_two_fields() {
        let mut entity = json!({});
        set_directory(&mut entity, &Value::String("/mnt/tank/x".into())).unwrap();
        assert_eq!(entity["target_type"], json!("DIRECTORY"));
        set_dataset(&mut entity, &Value::String("tank/x".into())).unwrap();
        assert_eq!(entity, json!({"target_path": "tank/x", "target_type": "DATASET"}));
    }

    #[test]
    fn security_choices_depend_on_type() {
        assert!(security_choices(&json!({"type": "smb"})).contains(&"domain".to_string()));
        assert!(security_choices(&json!({"type": "nfs"})).contains(&"krb5".to_string()));
    }

    #[test]
    fn clients_lists_connections_of_one_share() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let Output::Table(table) = session
            .eval("share nfs media clients")
            .unwrap()
            .pop()
            .unwrap()
        else {
            panic!("expected a table");
        };
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0]["user"], json!("alice"));
        assert!(fx.remote.calls().contains(&CLIENTS_METHOD.to_string()));
    }
}
