//! Live entity feed.
//!
//! A feed mirrors one remote collection and is kept current by pushed
//! [`FeedEvent`]s. Events may arrive on any thread; a batch is applied under a
//! single write lock so readers see either the state before it or after it.

use crate::model::{key_string, Entity};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Created(Entity),
    Updated(Entity),
    /// Key of the removed entity.
    Deleted(String),
}

#[derive(Debug)]
pub struct EntityFeed {
    key_field: String,
    rows: RwLock<Vec<Entity>>,
}

impl EntityFeed {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn apply(&self, event: FeedEvent) {
        self.apply_batch(std::iter::once(event));
    }

    pub fn apply_batch(&self, events: impl IntoIterator<Item = FeedEvent>) {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            match event {
                FeedEvent::Created(entity) | FeedEvent::Updated(entity) => {
                    let Some(key) = key_string(&entity, &self.key_field) else {
                        tracing::warn!(field = %self.key_field, "feed event without key dropped");
                        continue;
                    };
                    match rows
                        .iter_mut()
                        .find(|row| key_string(row, &self.key_field).as_deref() == Some(&key))
                    {
                        Some(row) => *row = entity,
                        None => rows.push(entity),
                    }
                }
                FeedEvent::Deleted(key) => {
                    rows.retain(|row| key_string(row, &self.key_field).as_deref() != Some(&key));
                }
            }
        }
    }

    /// Replace the whole collection, e.g. on (re)subscription.
    pub fn reset(&self, entities: Vec<Entity>) {
        *self.rows.write().unwrap_or_else(PoisonError::into_inner) = entities;
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, key: &str) -> Option<Entity> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|row| key_string(row, &self.key_field).as_deref() == Some(key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn events_upsert_and_delete_by_key() {
        let feed = EntityFeed::new("id");
        feed.apply(FeedEvent::Created(json!({"id": 1, "name": "a"})));
        feed.apply(FeedEvent::Created(json!({"id": 2, "name": "b"})));
        feed.apply(FeedEvent::Updated(json!({"id": 1, "name": "a2"})));
        assert_eq!(feed.find("1"), Some(json!({"id": 1, "name": "a2"})));
        assert_eq!(feed.len(), 2);

        feed.apply(FeedEvent::Deleted("2".to_string()));
        assert_eq!(feed.snapshot(), vec![json!({"id": 1, "name": "a2"})]);
    }

    #[test]
    fn keyless_events_are_dropped() {
        let feed = EntityFeed::new("id");
        feed.apply(FeedEvent::Created(json!({"name": "orphan"})));
        assert!(feed.is_empty());
    }

    #[test]
    fn readers_never_see_half_applied_batches() {
        let feed = Arc::new(EntityFeed::new("id"));
        feed.reset(vec![json!({"id": 1, "gen": 0}), json!({"id": 2, "gen": 0})]);

        let writer = {
            let feed = feed.clone();
            thread::spawn(move || {
                for gen in 1..200 {
                    feed.apply_batch(vec![
                        FeedEvent::Updated(json!({"id": 1, "gen": gen})),
                        FeedEvent::Updated(json!({"id": 2, "gen": gen})),
                    ]);
                }
            })
        };

        for _ in 0..200 {
            let snapshot = feed.snapshot();
            assert_eq!(snapshot[0]["gen"], snapshot[1]["gen"]);
        }
        writer.join().unwrap();
    }
}
