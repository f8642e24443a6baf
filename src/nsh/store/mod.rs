//! # Load and Save Strategies
//!
//! A collection namespace does not know where its entities come from or how
//! edits reach the backend. It is constructed with two strategy objects:
//!
//! - a [`LoadStrategy`], answering queries and holding the snapshot of the
//!   latest successful load
//! - an optional [`SaveStrategy`], turning create/update/delete into
//!   [`TaskPromise`]s (collections without one are read-only)
//!
//! ## Implementations
//!
//! - [`load::QueryLoader`]: synchronous `<collection>.query` RPC, with fixed
//!   base predicates prepended to every query
//! - [`load::FeedLoader`]: evaluates queries over a live [`EntityFeed`]
//!   snapshot; the feed itself is kept current by pushed events
//! - [`save::TaskSaver`]: submits `create`/`update`/`delete` tasks
//! - [`save::CallSaver`]: performs the same operations as blocking calls and
//!   returns promises that are already resolved
//! - [`field::FieldLoader`] / [`field::FieldSaver`]: a collection kept as a
//!   list inside one field of a parent entity; saving an element saves the
//!   parent
//!
//! [`EntityFeed`]: crate::feed::EntityFeed

use crate::error::Result;
use crate::model::Entity;
use crate::query::Query;
use crate::task::TaskPromise;
use serde_json::Value as Json;

pub mod field;
pub mod load;
pub mod save;

pub trait LoadStrategy: Send + Sync {
    /// Fetch entities matching `query`.
    fn load(&self, query: &Query) -> Result<Vec<Entity>>;

    /// Entities as of the latest successful load. Never performs a load.
    fn snapshot(&self) -> Vec<Entity>;

    /// Reflect a confirmed create or update.
    fn upsert(&self, entity: &Entity);

    /// Reflect a confirmed delete.
    fn evict(&self, key: &str);

    /// Field the loader identifies rows by, when it tracks rows by key.
    /// A collection's save key has to agree with it.
    fn key_field(&self) -> Option<&str> {
        None
    }
}

pub trait SaveStrategy: Send + Sync {
    fn create(&self, entity: &Entity, extra: &[Json]) -> Result<TaskPromise>;

    fn update(&self, key: &Json, entity: &Entity) -> Result<TaskPromise>;

    fn delete(&self, key: &Json, extra: &[Json]) -> Result<TaskPromise>;
}
