//! # Namespace Catalogue
//!
//! The object tree the bundled binary exposes, built from the core pieces:
//!
//! ```text
//! /
//! ├── system/ui      plain namespace, RPC-backed show/set
//! ├── account/user   query-loaded collection, task-saved
//! │   └── <user>/sshkey  the user's key list, saved with the user
//! ├── account/group  query-loaded collection, task-saved
//! ├── share          feed-loaded, read-only
//! │   ├── nfs        same feed narrowed to type=nfs, task-saved, `clients`
//! │   └── smb        same feed narrowed to type=smb, task-saved, `clients`
//! └── task           remote task history, read-only
//! ```
//!
//! [`demo_remote`] seeds an [`InMemoryRemote`] with matching data.

use crate::error::Result;
use crate::feed::EntityFeed;
use crate::model::merge;
use crate::namespace::{Namespace, PlainNamespace};
use crate::remote::memory::InMemoryRemote;
use crate::remote::Connection;
use crate::session::Session;
use crate::task::TaskTable;
use serde_json::{json, Value as Json};
use std::sync::{Arc, Mutex, PoisonError};

pub mod account;
pub mod share;
pub mod system;
pub mod task;

pub const SHARE_COLLECTION: &str = "share";

pub fn root(connection: &Connection, shares: Arc<EntityFeed>) -> Result<Namespace> {
    Ok(PlainNamespace::new("")
        .describe("Root")
        .child(system::system(connection)?)
        .child(account::account(connection)?)
        .child(share::shares(connection, shares)?)
        .child(task::tasks(connection)?)
        .build())
}

fn seed_users(remote: &InMemoryRemote) {
    remote.add_collection("account.user", "id");
    remote.seed(
        "account.user",
        vec![
            json!({"id": 1, "username": "root", "uid": 0, "full_name": "root",
                   "shell": "/bin/sh", "home": "/root", "groups": ["wheel"]}),
            json!({"id": 2, "username": "alice", "uid": 1001, "full_name": "Alice Liddell",
                   "shell": "/usr/bin/zsh", "home": "/home/alice", "groups": ["staff", "wheel"],
                   "ssh_keys": [
                       {"name": "laptop", "type": "ssh-ed25519",
                        "key": "AAAAC3NzaC1lZDI1NTE5AAAAIalice", "comment": "alice@laptop"},
                       {"name": "ci", "type": "ssh-rsa",
                        "key": "AAAAB3NzaC1yc2EAAAADAQABci"},
                   ]}),
            json!({"id": 3, "username": "bob", "uid": 1002, "full_name": "Bob Stone",
                   "shell": "/bin/bash", "home": "/home/bob", "groups": ["staff"]}),
        ],
    );
    remote.add_collection("account.group", "id");
    remote.seed(
        "account.group",
        vec![
            json!({"id": 1, "name": "wheel", "gid": 0, "sudo": true}),
            json!({"id": 2, "name": "staff", "gid": 50, "sudo": false}),
        ],
    );
}

fn seed_shares(remote: &InMemoryRemote) {
    remote.add_collection(SHARE_COLLECTION, "id");
    remote.seed(
        SHARE_COLLECTION,
        vec![
            json!({"id": 1, "name": "media", "type": "nfs", "enabled": true,
                   "target_path": "tank/media", "target_type": "DATASET",
                   "security": "sys", "hosts": ["10.0.0.0/24"]}),
            json!({"id": 2, "name": "backup", "type": "nfs", "enabled": false,
                   "target_path": "/mnt/tank/backup", "target_type": "DIRECTORY",
                   "security": "krb5", "hosts": []}),
            json!({"id": 3, "name": "public", "type": "smb", "enabled": true,
                   "target_path": "tank/public", "target_type": "DATASET",
                   "security": "user", "guest_ok": true}),
        ],
    );
}

fn register_ui(remote: &InMemoryRemote) {
    let config = Arc::new(Mutex::new(json!({
        "port": 80,
        "https_port": 443,
        "redirect": false,
        "language": "en",
        "addresses": ["0.0.0.0"],
    })));

    let current = config.clone();
    remote.register_method(system::GET_METHOD, move |_args: &[Json]| {
        Ok(current.lock().unwrap_or_else(PoisonError::into_inner).clone())
    });
    remote.register_method("system.ui.update", move |args: &[Json]| {
        let mut config = config.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(patch) = args.get(1) {
            merge(&mut config, patch);
        }
        Ok(config.clone())
    });
}

fn register_clients(remote: &InMemoryRemote) {
    remote.register_method(share::CLIENTS_METHOD, |args: &[Json]| {
        let clients = match args.first() {
            Some(id) if *id == json!(1) => json!([
                {"host": "10.0.0.12", "user": "alice", "connected_at": "2026-10-01T08:30:00Z"},
                {"host": "10.0.0.40", "user": "bob", "connected_at": "2026-10-02T17:05:00Z"},
            ]),
            _ => json!([]),
        };
        Ok(clients)
    });
}

/// An in-memory backend holding the catalogue's sample data.
pub fn demo_remote(tasks: TaskTable) -> Arc<InMemoryRemote> {
    let remote = InMemoryRemote::new(tasks);
    seed_users(&remote);
    seed_shares(&remote);
    register_ui(&remote);
    register_clients(&remote);
    Arc::new(remote)
}

/// A session over a fresh demo backend.
pub fn demo_session() -> Result<(Session, Arc<InMemoryRemote>)> {
    let tasks = TaskTable::new();
    let remote = demo_remote(tasks.clone());
    let connection = Connection::new(remote.clone(), tasks);
    let shares = remote.subscribe(SHARE_COLLECTION)?;
    let root = root(&connection, shares)?;
    Ok((Session::new(root, connection), remote))
}
