//! Shared fixture: the catalogue over a seeded in-memory remote.

use crate::catalog;
use crate::namespace::{CollectionNamespace, Namespace};
use crate::query::Query;
use crate::remote::memory::InMemoryRemote;
use crate::remote::Connection;
use crate::session::Session;
use crate::task::TaskTable;
use std::sync::Arc;

pub struct Fixture {
    pub root: Namespace,
    pub remote: Arc<InMemoryRemote>,
    pub connection: Connection,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let tasks = TaskTable::new();
        let remote = catalog::demo_remote(tasks.clone());
        let connection = Connection::new(remote.clone(), tasks);
        let shares = remote.subscribe(catalog::SHARE_COLLECTION).unwrap();
        let root = catalog::root(&connection, shares).unwrap();
        Self {
            root,
            remote,
            connection,
        }
    }

    pub fn collection(&self, path: &str) -> Arc<CollectionNamespace> {
        let mut node = self.root.clone();
        for name in path.split('/') {
            node = node.child(name).unwrap();
        }
        node.as_collection().unwrap().clone()
    }

    pub fn users(&self) -> Arc<CollectionNamespace> {
        self.collection("account/user")
    }

    /// Run an unfiltered load so entity namespaces exist.
    pub fn load_users(&self) {
        self.users().load(&Query::default()).unwrap();
    }

    pub fn session(&self) -> Session {
        Session::new(self.root.clone(), self.connection.clone())
    }
}
