use super::LoadStrategy;
use crate::error::{NshError, Result};
use crate::feed::EntityFeed;
use crate::model::{key_string, Entity};
use crate::query::{Predicate, Query};
use crate::remote::Connection;
use serde_json::Value as Json;
use std::sync::{Arc, PoisonError, RwLock};

/// Loads through a synchronous `query` RPC.
pub struct QueryLoader {
    connection: Connection,
    method: String,
    key_field: String,
    base: Vec<Predicate>,
    cache: RwLock<Vec<Entity>>,
}

impl QueryLoader {
    /// `namespace` is the remote collection, e.g. `account.user`.
    pub fn new(connection: Connection, namespace: &str, key_field: &str) -> Self {
        Self {
            connection,
            method: format!("{}.query", namespace),
            key_field: key_field.to_string(),
            base: Vec::new(),
            cache: RwLock::new(Vec::new()),
        }
    }

    pub fn with_base(mut self, base: Vec<Predicate>) -> Self {
        self.base = base;
        self
    }

    fn upsert_all(cache: &mut Vec<Entity>, key_field: &str, rows: &[Entity]) {
        for row in rows {
            let key = key_string(row, key_field);
            match cache
                .iter_mut()
                .find(|cached| key.is_some() && key_string(cached, key_field) == key)
            {
                Some(cached) => *cached = row.clone(),
                None => cache.push(row.clone()),
            }
        }
    }
}

impl LoadStrategy for QueryLoader {
    fn load(&self, query: &Query) -> Result<Vec<Entity>> {
        let query_json = serde_json::to_value(query.with_base(&self.base))?;
        let response = self.connection.call(&self.method, &[query_json])?;
        let Json::Array(items) = response else {
            return Err(NshError::RemoteCall(format!(
                "{} returned a non-list result",
                self.method
            )));
        };

        let rows: Vec<Entity> = items
            .into_iter()
            .filter(|item| {
                let keep = item.is_object();
                if !keep {
                    tracing::warn!(method = %self.method, "non-object row dropped");
                }
                keep
            })
            .collect();

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if query.filter.is_empty() && query.limit.is_none() {
            *cache = rows.clone();
        } else {
            Self::upsert_all(&mut cache, &self.key_field, &rows);
        }
        Ok(rows)
    }

    fn snapshot(&self) -> Vec<Entity> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn upsert(&self, entity: &Entity) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Self::upsert_all(&mut cache, &self.key_field, std::slice::from_ref(entity));
    }

    fn evict(&self, key: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|row| key_string(row, &self.key_field).as_deref() != Some(key));
    }

    fn key_field(&self) -> Option<&str> {
        Some(&self.key_field)
    }
}

/// Evaluates queries over a live feed.
pub struct FeedLoader {
    feed: Arc<EntityFeed>,
    base: Vec<Predicate>,
}

impl FeedLoader {
    pub fn new(feed: Arc<EntityFeed>) -> Self {
        Self {
            feed,
            base: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: Vec<Predicate>) -> Self {
        self.base = base;
        self
    }
}

impl LoadStrategy for FeedLoader {
    fn load(&self, query: &Query) -> Result<Vec<Entity>> {
        Ok(query.with_base(&self.base).apply(self.feed.snapshot()))
    }

    fn snapshot(&self) -> Vec<Entity> {
        Query::default().with_base(&self.base).apply(self.feed.snapshot())
    }

    // The feed receives confirmed changes from the remote itself.
    fn upsert(&self, _entity: &Entity) {}

    fn evict(&self, _key: &str) {}

    fn key_field(&self) -> Option<&str> {
        Some(self.feed.key_field())
    }
}
