//! # Namespace Tree
//!
//! The shell's object model is a tree navigated like a filesystem. Each node
//! is one of three kinds:
//!
//! - [`PlainNamespace`]: a static grouping node with fixed children and
//!   commands (`system`, `account`)
//! - [`CollectionNamespace`]: a set of remote entities behind a load
//!   strategy and an optional save strategy (`account/user`)
//! - [`EntityNamespace`]: one entity of a collection, addressed by its
//!   primary-key value (`account/user/root`)
//!
//! The session's position is a path: the list of namespaces from the root to
//! the current node. [`resolve`] walks a `/`-separated spec from a path.
//!
//! A collection's children are its static sub-namespaces followed by one
//! entity namespace per entity of the latest successful load. Listing them
//! never triggers a load, so they may be stale until the next `show`. An
//! entity's children are the sub-namespaces its collection builds for it
//! (`account/user/alice/sshkey`).

use crate::commands::Command;
use crate::error::{NshError, Result};
use crate::property::PropertySet;
use std::fmt;
use std::sync::Arc;

pub mod collection;
pub mod entity;
pub mod plain;

pub use collection::{CollectionBuilder, CollectionNamespace, EntityChild};
pub use entity::{EditState, EntityNamespace};
pub use plain::PlainNamespace;

#[derive(Clone)]
pub enum Namespace {
    Plain(Arc<PlainNamespace>),
    Collection(Arc<CollectionNamespace>),
    Entity(Arc<EntityNamespace>),
}

impl Namespace {
    pub fn name(&self) -> String {
        match self {
            Namespace::Plain(ns) => ns.name().to_string(),
            Namespace::Collection(ns) => ns.name().to_string(),
            Namespace::Entity(ns) => ns.name(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Namespace::Plain(ns) => ns.description().to_string(),
            Namespace::Collection(ns) => ns.description().to_string(),
            Namespace::Entity(ns) => ns
                .collection()
                .map(|c| format!("{} {}", c.name(), ns.name()))
                .unwrap_or_default(),
        }
    }

    /// Child namespaces, in resolution order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        match self {
            Namespace::Plain(ns) => ns.children().to_vec(),
            Namespace::Collection(ns) => ns
                .children()
                .iter()
                .cloned()
                .chain(ns.entities().into_iter().map(Namespace::Entity))
                .collect(),
            Namespace::Entity(ns) => ns.children(),
        }
    }

    /// First child named `name`.
    pub fn child(&self, name: &str) -> Option<Namespace> {
        self.namespaces().into_iter().find(|ns| ns.name() == name)
    }

    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        match self {
            Namespace::Plain(ns) => ns.commands().get(name),
            Namespace::Collection(ns) => ns.commands().get(name),
            Namespace::Entity(ns) => ns.collection().ok()?.entity_commands().get(name),
        }
    }

    pub fn command_names(&self) -> Vec<String> {
        match self {
            Namespace::Plain(ns) => ns.commands().names(),
            Namespace::Collection(ns) => ns.commands().names(),
            Namespace::Entity(ns) => ns
                .collection()
                .map(|c| c.entity_commands().names())
                .unwrap_or_default(),
        }
    }

    /// Property mappings of collections and their entities.
    pub fn properties(&self) -> Option<PropertySet> {
        match self {
            Namespace::Plain(_) => None,
            Namespace::Collection(ns) => Some(ns.properties().clone()),
            Namespace::Entity(ns) => ns.collection().ok().map(|c| c.properties().clone()),
        }
    }

    /// Field holding the primary-key value of this namespace's entities.
    pub fn primary_key(&self) -> Option<String> {
        match self {
            Namespace::Plain(_) => None,
            Namespace::Collection(ns) => Some(ns.primary_key().to_string()),
            Namespace::Entity(ns) => ns.collection().ok().map(|c| c.primary_key().to_string()),
        }
    }

    pub fn as_collection(&self) -> Option<&Arc<CollectionNamespace>> {
        match self {
            Namespace::Collection(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<EntityNamespace>> {
        match self {
            Namespace::Entity(ns) => Some(ns),
            _ => None,
        }
    }

    /// Identity, not structural equality.
    pub fn same(&self, other: &Namespace) -> bool {
        match (self, other) {
            (Namespace::Plain(a), Namespace::Plain(b)) => Arc::ptr_eq(a, b),
            (Namespace::Collection(a), Namespace::Collection(b)) => Arc::ptr_eq(a, b),
            (Namespace::Entity(a), Namespace::Entity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Namespace::Plain(_) => "Plain",
            Namespace::Collection(_) => "Collection",
            Namespace::Entity(_) => "Entity",
        };
        write!(f, "{}({})", kind, self.name())
    }
}

/// Walk `spec` from `current`.
///
/// Tokens are separated by `/`: `..` goes up (not past the root), a leading
/// empty token (from `/x`) restarts at the root, `-` jumps to `previous`,
/// anything else must name a child of the node reached so far.
pub fn resolve(
    current: &[Namespace],
    previous: &[Namespace],
    spec: &str,
) -> Result<Vec<Namespace>> {
    if current.is_empty() {
        return Err(NshError::Definition("empty namespace path".to_string()));
    }

    let mut path = current.to_vec();
    for (index, token) in spec.split('/').enumerate() {
        match token {
            "" if index == 0 => path.truncate(1),
            "" | "." => {}
            ".." => {
                if path.len() > 1 {
                    path.pop();
                }
            }
            "-" => {
                if !previous.is_empty() {
                    path = previous.to_vec();
                }
            }
            name => {
                let here = &path[path.len() - 1];
                let child = here
                    .child(name)
                    .ok_or_else(|| NshError::not_found(name, path_string(&path)))?;
                path.push(child);
            }
        }
    }
    Ok(path)
}

/// `/`-joined names below the root, e.g. `/account/user`.
pub fn path_string(path: &[Namespace]) -> String {
    let names: Vec<String> = path.iter().skip(1).map(Namespace::name).collect();
    format!("/{}", names.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;

    fn names(path: &[Namespace]) -> String {
        path_string(path)
    }

    #[test]
    fn resolves_nested_paths() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        let path = resolve(&root, &[], "system/ui").unwrap();
        assert_eq!(names(&path), "/system/ui");

        let back = resolve(&path, &[], "../..").unwrap();
        assert_eq!(back.len(), 1);
        assert!(back[0].same(&fx.root));
    }

    #[test]
    fn dotdot_is_associative_with_descent() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        let a = resolve(&root, &[], "account/user/../group").unwrap();
        let b = resolve(&root, &[], "account/group").unwrap();
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(x, y)| x.same(y)));
    }

    #[test]
    fn dotdot_stops_at_root_and_slash_restarts() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        assert_eq!(resolve(&root, &[], "../../..").unwrap().len(), 1);

        let deep = resolve(&root, &[], "account/user").unwrap();
        let path = resolve(&deep, &[], "/system").unwrap();
        assert_eq!(names(&path), "/system");
    }

    #[test]
    fn dash_returns_to_previous() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        let previous = resolve(&root, &[], "account/user").unwrap();
        let path = resolve(&root, &previous, "-").unwrap();
        assert_eq!(names(&path), "/account/user");
    }

    #[test]
    fn unknown_token_names_current_namespace() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        let err = resolve(&root, &[], "account/nope").unwrap_err();
        assert_eq!(err.to_string(), "'nope' not found in /account");
    }

    #[test]
    fn entities_appear_only_after_a_load() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        assert!(resolve(&root, &[], "account/user/root").is_err());
        assert!(fx.remote.calls().is_empty());

        fx.load_users();
        let path = resolve(&root, &[], "account/user/root").unwrap();
        assert!(path[3].as_entity().is_some());

        // Cached by key: the same instance comes back
        let again = resolve(&root, &[], "account/user/root").unwrap();
        assert!(path[3].same(&again[3]));
    }

    #[test]
    fn entities_have_their_own_sub_namespaces() {
        let fx = Fixture::new();
        let root = vec![fx.root.clone()];
        fx.load_users();

        let path = resolve(&root, &[], "account/user/alice/sshkey").unwrap();
        assert_eq!(names(&path), "/account/user/alice/sshkey");
        let keys = path[4].as_collection().unwrap();
        keys.load(&crate::query::Query::default()).unwrap();

        let laptop = resolve(&path, &[], "laptop").unwrap();
        assert!(laptop[5].as_entity().is_some());
        assert_eq!(names(&laptop), "/account/user/alice/sshkey/laptop");

        // Built once per entity
        let again = resolve(&root, &[], "account/user/alice/sshkey/laptop").unwrap();
        assert!(again[4].same(&path[4]));
        assert!(again[5].same(&laptop[5]));

        let up = resolve(&laptop, &[], "../../../bob/sshkey").unwrap();
        assert_eq!(names(&up), "/account/user/bob/sshkey");
        assert!(!up[4].same(&path[4]));

        let err = resolve(&root, &[], "account/user/alice/nope").unwrap_err();
        assert_eq!(err.to_string(), "'nope' not found in /account/user/alice");
    }
}
