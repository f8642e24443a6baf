use crate::error::Result;
use crate::namespace::{CollectionBuilder, EntityNamespace, Namespace, PlainNamespace};
use crate::property::{PropertyMapping, Requirement};
use crate::remote::Connection;
use crate::store::field::{FieldLoader, FieldSaver};
use crate::store::load::QueryLoader;
use crate::store::save::TaskSaver;
use crate::value::ValueType;
use std::sync::Arc;

pub const SHELLS: &[&str] = &["/bin/sh", "/bin/bash", "/usr/bin/zsh"];
pub const KEY_TYPES: &[&str] = &["ssh-ed25519", "ssh-rsa", "ecdsa-sha2-nistp256"];

/// A user's authorized keys. They live in the user's `ssh_keys` list and
/// are saved by saving the user.
pub fn ssh_keys(user: &Arc<EntityNamespace>) -> Result<Namespace> {
    CollectionBuilder::new("sshkey")
        .describe("Authorized SSH keys")
        .primary_key("name")
        .property(PropertyMapping::new("name", "name").describe("Key label"))
        .property(
            PropertyMapping::new("type", "type")
                .describe("Key algorithm")
                .choices(KEY_TYPES),
        )
        .property(
            PropertyMapping::new("key", "key")
                .describe("Base64 public key")
                .not_usersetable(),
        )
        .property(PropertyMapping::new("comment", "comment"))
        .require(Requirement::one("name"))
        .require(Requirement::one("type"))
        .require(Requirement::one("key"))
        .loader(FieldLoader::new(user, "ssh_keys", "name"))
        .saver(FieldSaver::new(user, "ssh_keys", "name"))
        .build()
}

pub fn users(connection: &Connection) -> Result<Namespace> {
    CollectionBuilder::new("user")
        .describe("Local users")
        .primary_key("username")
        .save_key("id")
        .property(
            PropertyMapping::new("id", "id")
                .typed(ValueType::Number)
                .read_only(),
        )
        .property(PropertyMapping::new("username", "username").describe("Login name"))
        .property(
            PropertyMapping::new("uid", "uid")
                .describe("Numeric user id")
                .typed(ValueType::Number)
                .not_usersetable(),
        )
        .property(PropertyMapping::new("full_name", "full_name").describe("Full name"))
        .property(
            PropertyMapping::new("shell", "shell")
                .describe("Login shell")
                .choices(SHELLS),
        )
        .property(
            PropertyMapping::new("home", "home")
                .describe("Home directory")
                .hidden()
                .not_createsetable(),
        )
        .property(
            PropertyMapping::new("groups", "groups")
                .describe("Auxiliary groups")
                .typed(ValueType::Set)
                .hidden(),
        )
        .property(
            PropertyMapping::new("delete_home", "delete_home")
                .describe("Remove the home directory too")
                .typed(ValueType::Boolean)
                .delete_arg(),
        )
        .require(Requirement::one("username"))
        .require(Requirement::one("uid"))
        .entity_child(ssh_keys)
        .loader(QueryLoader::new(connection.clone(), "account.user", "id"))
        .saver(TaskSaver::new(connection.clone(), "account.user"))
        .build()
}

pub fn groups(connection: &Connection) -> Result<Namespace> {
    CollectionBuilder::new("group")
        .describe("Local groups")
        .primary_key("name")
        .save_key("id")
        .property(
            PropertyMapping::new("id", "id")
                .typed(ValueType::Number)
                .read_only(),
        )
        .property(PropertyMapping::new("name", "name").describe("Group name"))
        .property(
            PropertyMapping::new("gid", "gid")
                .describe("Numeric group id")
                .typed(ValueType::Number)
                .not_usersetable(),
        )
        .property(
            PropertyMapping::new("sudo", "sudo")
                .describe("Members may use sudo")
                .typed(ValueType::Boolean),
        )
        .require(Requirement::one("name"))
        .loader(QueryLoader::new(connection.clone(), "account.group", "id"))
        .saver(TaskSaver::new(connection.clone(), "account.group"))
        .build()
}

pub fn account(connection: &Connection) -> Result<Namespace> {
    Ok(PlainNamespace::new("account")
        .describe("Users and groups")
        .child(users(connection)?)
        .child(groups(connection)?)
        .build())
}
