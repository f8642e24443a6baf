//! In-process remote.
//!
//! Holds named collections of JSON entities and answers the method names the
//! load and save strategies use:
//!
//! - `<collection>.query` with an optional serialized [`Query`]
//! - `<collection>.get` with a key
//! - `<collection>.create` with an entity and optional extra arguments
//! - `<collection>.update` with a key and a patch
//! - `<collection>.delete` with a key and optional extra arguments
//!
//! Anything else must be registered with [`InMemoryRemote::register_method`].
//! Every submitted task is also recorded in the built-in `task` collection.
//!
//! Tasks run inline by default ([`TaskMode::Immediate`]): the task table is
//! updated before `submit_task` returns, which is the worst case the
//! promise machinery has to handle. [`TaskMode::Manual`] queues tasks until
//! [`InMemoryRemote::run_pending`], for tests that need to observe the
//! in-flight state.

use super::Transport;
use crate::error::{NshError, Result};
use crate::feed::{EntityFeed, FeedEvent};
use crate::model::{key_string, merge, set_path, Entity};
use crate::query::Query;
use crate::task::{lock, TaskId, TaskTable, TaskUpdate};
use crate::value::json_text;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type MethodFn = Arc<dyn Fn(&[Json]) -> Result<Json> + Send + Sync>;

pub const TASK_COLLECTION: &str = "task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskMode {
    #[default]
    Immediate,
    Manual,
}

struct Collection {
    key_field: String,
    next_id: u64,
    rows: Vec<Entity>,
    feeds: Vec<Arc<EntityFeed>>,
}

impl Collection {
    fn new(key_field: &str) -> Self {
        Self {
            key_field: key_field.to_string(),
            next_id: 0,
            rows: Vec::new(),
            feeds: Vec::new(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| key_string(row, &self.key_field).as_deref() == Some(key))
    }

    fn bump_id(&mut self, entity: &Entity) {
        if let Some(id) = entity.get(&self.key_field).and_then(Json::as_u64) {
            self.next_id = self.next_id.max(id);
        }
    }

    /// Apply an event to the rows and collect the feed notifications for it.
    fn apply(&mut self, event: FeedEvent) -> Vec<(Arc<EntityFeed>, FeedEvent)> {
        match &event {
            FeedEvent::Created(entity) | FeedEvent::Updated(entity) => {
                self.bump_id(entity);
                let key = key_string(entity, &self.key_field).unwrap_or_default();
                match self.position(&key) {
                    Some(pos) => self.rows[pos] = entity.clone(),
                    None => self.rows.push(entity.clone()),
                }
            }
            FeedEvent::Deleted(key) => {
                if let Some(pos) = self.position(key) {
                    self.rows.remove(pos);
                }
            }
        }
        self.feeds
            .iter()
            .map(|feed| (feed.clone(), event.clone()))
            .collect()
    }
}

struct QueuedTask {
    id: TaskId,
    method: String,
    args: Vec<Json>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    methods: HashMap<String, MethodFn>,
    queue: VecDeque<QueuedTask>,
    failures: HashMap<String, String>,
    unresponsive: HashSet<String>,
    calls: Vec<String>,
    next_task: TaskId,
    mode: TaskMode,
}

pub struct InMemoryRemote {
    state: Mutex<State>,
    tasks: TaskTable,
}

type Notifications = Vec<(Arc<EntityFeed>, FeedEvent)>;

impl InMemoryRemote {
    pub fn new(tasks: TaskTable) -> Self {
        let mut state = State::default();
        state
            .collections
            .insert(TASK_COLLECTION.to_string(), Collection::new("id"));
        Self {
            state: Mutex::new(state),
            tasks,
        }
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn set_task_mode(&self, mode: TaskMode) {
        lock(&self.state).mode = mode;
    }

    pub fn add_collection(&self, name: &str, key_field: &str) {
        lock(&self.state)
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(key_field));
    }

    pub fn seed(&self, name: &str, rows: impl IntoIterator<Item = Entity>) {
        for row in rows {
            self.apply_external(name, FeedEvent::Created(row));
        }
    }

    pub fn rows(&self, name: &str) -> Vec<Entity> {
        lock(&self.state)
            .collections
            .get(name)
            .map(|c| c.rows.clone())
            .unwrap_or_default()
    }

    pub fn register_method(
        &self,
        name: &str,
        method: impl Fn(&[Json]) -> Result<Json> + Send + Sync + 'static,
    ) {
        lock(&self.state)
            .methods
            .insert(name.to_string(), Arc::new(method));
    }

    /// A live feed of `name`, kept current by every later change.
    pub fn subscribe(&self, name: &str) -> Result<Arc<EntityFeed>> {
        let mut state = lock(&self.state);
        let collection = state
            .collections
            .get_mut(name)
            .ok_or_else(|| NshError::RemoteCall(format!("Unknown collection {}", name)))?;
        let feed = Arc::new(EntityFeed::new(collection.key_field.clone()));
        feed.reset(collection.rows.clone());
        collection.feeds.push(feed.clone());
        Ok(feed)
    }

    /// A change made by someone else; subscribers are notified.
    pub fn apply_external(&self, name: &str, event: FeedEvent) {
        let notifications = {
            let mut state = lock(&self.state);
            let collection = state
                .collections
                .entry(name.to_string())
                .or_insert_with(|| Collection::new("id"));
            collection.apply(event)
        };
        notify(notifications);
    }

    /// The next execution of `method` fails with `message`.
    pub fn fail_next(&self, method: &str, message: &str) {
        lock(&self.state)
            .failures
            .insert(method.to_string(), message.to_string());
    }

    /// Synchronous calls to `method` time out.
    pub fn set_unresponsive(&self, method: &str) {
        lock(&self.state).unresponsive.insert(method.to_string());
    }

    /// Every method called or submitted, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Run queued tasks in submission order. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            let next = lock(&self.state).queue.pop_front();
            let Some(task) = next else {
                return count;
            };
            self.run_task(task.id, &task.method, &task.args);
            count += 1;
        }
    }

    fn run_task(&self, id: TaskId, method: &str, args: &[Json]) {
        self.tasks.apply(TaskUpdate::running(id, None));
        self.record_task(id, "EXECUTING", None);
        match self.execute(method, args) {
            Ok(result) => {
                self.record_task(id, "FINISHED", None);
                self.tasks.apply(TaskUpdate::finished(id, result));
            }
            Err(err) => {
                let message = err.to_string();
                self.record_task(id, "FAILED", Some(&message));
                self.tasks.apply(TaskUpdate::failed(id, message));
            }
        }
    }

    fn record_task(&self, id: TaskId, state: &str, error: Option<&str>) {
        let mut guard = lock(&self.state);
        let Some(tasks) = guard.collections.get_mut(TASK_COLLECTION) else {
            return;
        };
        if let Some(pos) = tasks.position(&id.to_string()) {
            let row = &mut tasks.rows[pos];
            set_path(row, "state", json!(state));
            if let Some(error) = error {
                set_path(row, "error", json!(error));
            }
        }
    }

    fn execute(&self, method: &str, args: &[Json]) -> Result<Json> {
        let custom = {
            let mut state = lock(&self.state);
            if let Some(message) = state.failures.remove(method) {
                return Err(NshError::RemoteCall(message));
            }
            state.methods.get(method).cloned()
        };
        if let Some(custom) = custom {
            return custom(args);
        }

        let (result, notifications) = self.collection_op(method, args)?;
        notify(notifications);
        Ok(result)
    }

    fn collection_op(&self, method: &str, args: &[Json]) -> Result<(Json, Notifications)> {
        let unknown = || NshError::RemoteCall(format!("Unknown method {}", method));
        let (name, op) = method.rsplit_once('.').ok_or_else(unknown)?;

        let mut state = lock(&self.state);
        let collection = state.collections.get_mut(name).ok_or_else(unknown)?;
        let key_arg = || {
            args.first()
                .filter(|k| !k.is_null())
                .map(json_text)
                .ok_or_else(|| NshError::RemoteCall(format!("{} requires a key", method)))
        };

        match op {
            "query" => {
                let query: Query = match args.first() {
                    Some(q) if !q.is_null() => serde_json::from_value(q.clone())?,
                    _ => Query::default(),
                };
                let rows = query.apply(collection.rows.clone());
                Ok((Json::Array(rows), Vec::new()))
            }
            "get" => {
                let key = key_arg()?;
                let row = collection
                    .position(&key)
                    .map(|pos| collection.rows[pos].clone())
                    .unwrap_or(Json::Null);
                Ok((row, Vec::new()))
            }
            "create" => {
                let mut entity = args
                    .first()
                    .filter(|e| e.is_object())
                    .cloned()
                    .ok_or_else(|| NshError::RemoteCall(format!("{} expects an object", method)))?;
                let key = match key_string(&entity, &collection.key_field) {
                    Some(key) => key,
                    None => {
                        collection.next_id += 1;
                        set_path(&mut entity, &collection.key_field, json!(collection.next_id));
                        collection.next_id.to_string()
                    }
                };
                if collection.position(&key).is_some() {
                    return Err(NshError::RemoteCall(format!(
                        "{} '{}' already exists",
                        name, key
                    )));
                }
                let notifications = collection.apply(FeedEvent::Created(entity.clone()));
                Ok((entity, notifications))
            }
            "update" => {
                let key = key_arg()?;
                let pos = collection
                    .position(&key)
                    .ok_or_else(|| NshError::RemoteCall(format!("{} '{}' does not exist", name, key)))?;
                let mut entity = collection.rows[pos].clone();
                if let Some(patch) = args.get(1) {
                    merge(&mut entity, patch);
                }
                let notifications = collection.apply(FeedEvent::Updated(entity.clone()));
                Ok((entity, notifications))
            }
            "delete" => {
                let key = key_arg()?;
                if collection.position(&key).is_none() {
                    return Err(NshError::RemoteCall(format!(
                        "{} '{}' does not exist",
                        name, key
                    )));
                }
                let notifications = collection.apply(FeedEvent::Deleted(key));
                Ok((Json::Null, notifications))
            }
            _ => Err(unknown()),
        }
    }
}

fn notify(notifications: Notifications) {
    for (feed, event) in notifications {
        feed.apply(event);
    }
}

impl Transport for InMemoryRemote {
    fn call_sync(&self, method: &str, args: &[Json], timeout: Duration) -> Result<Json> {
        {
            let mut state = lock(&self.state);
            state.calls.push(method.to_string());
            if state.unresponsive.contains(method) {
                return Err(NshError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        }
        self.execute(method, args)
    }

    fn submit_task(&self, method: &str, args: &[Json]) -> Result<TaskId> {
        let (id, mode) = {
            let mut state = lock(&self.state);
            state.calls.push(method.to_string());
            state.next_task += 1;
            let id = state.next_task;
            let row = json!({
                "id": id,
                "name": method,
                "state": "CREATED",
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            });
            if let Some(tasks) = state.collections.get_mut(TASK_COLLECTION) {
                tasks.apply(FeedEvent::Created(row));
            }
            (id, state.mode)
        };

        match mode {
            TaskMode::Immediate => self.run_task(id, method, args),
            TaskMode::Manual => lock(&self.state).queue.push_back(QueuedTask {
                id,
                method: method.to_string(),
                args: args.to_vec(),
            }),
        }
        Ok(id)
    }

    fn abort_task(&self, id: TaskId) -> Result<()> {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.queue.len();
            state.queue.retain(|task| task.id != id);
            state.queue.len() != before
        };
        if removed {
            self.record_task(id, "ABORTED", None);
            self.tasks.apply(TaskUpdate::aborted(id));
        } else {
            tracing::debug!(task = id, "abort ignored, task not queued");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Operator, Predicate};
    use crate::task::TaskStatus;

    fn remote() -> InMemoryRemote {
        let remote = InMemoryRemote::new(TaskTable::new());
        remote.add_collection("account.user", "id");
        remote.seed(
            "account.user",
            vec![
                json!({"id": 1, "username": "root"}),
                json!({"id": 2, "username": "alice"}),
            ],
        );
        remote
    }

    #[test]
    fn query_applies_serialized_query() {
        let remote = remote();
        let mut query = Query::default();
        query.push(Predicate::compare("username", Operator::Eq, json!("alice")).unwrap());
        let rows = remote
            .call_sync(
                "account.user.query",
                &[serde_json::to_value(&query).unwrap()],
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(rows, json!([{"id": 2, "username": "alice"}]));
    }

    #[test]
    fn create_assigns_next_id_and_notifies_feeds() {
        let remote = remote();
        let feed = remote.subscribe("account.user").unwrap();
        let id = remote
            .submit_task("account.user.create", &[json!({"username": "bob"})])
            .unwrap();

        let record = remote.tasks().get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.result, Some(json!({"id": 3, "username": "bob"})));
        assert_eq!(feed.find("3"), Some(json!({"id": 3, "username": "bob"})));
    }

    #[test]
    fn failures_are_reported_through_the_task_table() {
        let remote = remote();
        remote.fail_next("account.user.delete", "user is logged in");
        let id = remote
            .submit_task("account.user.delete", &[json!(1)])
            .unwrap();
        let record = remote.tasks().get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Remote call failed: user is logged in"));
        assert_eq!(remote.rows("account.user").len(), 2);

        let history = remote.rows(TASK_COLLECTION);
        assert_eq!(history[0]["state"], json!("FAILED"));
    }

    #[test]
    fn manual_mode_queues_until_run_and_abort_removes() {
        let remote = remote();
        remote.set_task_mode(TaskMode::Manual);
        let first = remote.submit_task("account.user.delete", &[json!(1)]).unwrap();
        let second = remote.submit_task("account.user.delete", &[json!(2)]).unwrap();
        let first = remote.tasks().register(first, "s1", "account.user.delete");
        let second = remote.tasks().register(second, "s1", "account.user.delete");
        assert_eq!(first.status(), TaskStatus::Pending);

        remote.abort_task(second.id()).unwrap();
        assert_eq!(second.status(), TaskStatus::Aborted);

        assert_eq!(remote.run_pending(), 1);
        assert_eq!(first.status(), TaskStatus::Finished);
        assert_eq!(remote.rows("account.user").len(), 1);
    }

    #[test]
    fn unresponsive_methods_time_out() {
        let remote = remote();
        remote.set_unresponsive("account.user.query");
        let err = remote
            .call_sync("account.user.query", &[], Duration::from_secs(3))
            .unwrap_err();
        assert!(matches!(err, NshError::Timeout { .. }));
    }

    #[test]
    fn unknown_methods_fail() {
        let remote = remote();
        let err = remote
            .call_sync("system.reboot", &[], Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.to_string(), "Remote call failed: Unknown method system.reboot");
    }

    #[test]
    fn registered_methods_are_called() {
        let remote = remote();
        remote.register_method("system.ui.get_config", |_| Ok(json!({"theme": "dark"})));
        let result = remote
            .call_sync("system.ui.get_config", &[], Duration::from_secs(1))
            .unwrap();
        assert_eq!(result["theme"], json!("dark"));
        assert_eq!(remote.calls(), vec!["system.ui.get_config"]);
    }
}
