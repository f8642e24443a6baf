//! Remote task tracking.
//!
//! Mutations are not performed inline: the transport submits a task and hands
//! back an id, and status updates for that id arrive later, on whatever
//! thread the transport uses. The [`TaskTable`] is the process-wide meeting
//! point. Transports push [`TaskUpdate`]s into it, and callers hold a
//! [`TaskPromise`] for each task they submitted.
//!
//! ## State machine
//!
//! ```text
//! Pending -> Running -> Finished
//!                    -> Failed
//!                    -> Aborted
//! ```
//!
//! Terminal states are final; later updates for the same id are ignored.
//! Updates may arrive before the submitter registers the id (the task can
//! finish before `submit_task` returns), so an unknown id gets a placeholder
//! slot that registration later claims.
//!
//! A registered task is dropped from the table as soon as it finishes
//! successfully; promises already handed out keep their record. Failed and
//! aborted tasks stay, listed by [`TaskTable::pending`], until a waiter
//! observes them. Placeholders nobody registered keep their terminal record
//! for lookups by id.

use crate::error::{NshError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub session: Option<String>,
    pub method: String,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub result: Option<Json>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            session: None,
            method: String::new(),
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A status change pushed by the transport.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub result: Option<Json>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn running(id: TaskId, progress: Option<u8>) -> Self {
        Self {
            id,
            status: TaskStatus::Running,
            progress,
            result: None,
            error: None,
        }
    }

    pub fn finished(id: TaskId, result: Json) -> Self {
        Self {
            id,
            status: TaskStatus::Finished,
            progress: Some(100),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(id: TaskId, error: impl Into<String>) -> Self {
        Self {
            id,
            status: TaskStatus::Failed,
            progress: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn aborted(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Aborted,
            progress: None,
            result: None,
            error: Some("aborted".to_string()),
        }
    }
}

type Hook = Box<dyn FnOnce(&TaskRecord) + Send>;

struct SlotState {
    record: TaskRecord,
    hooks: Vec<Hook>,
    observed: bool,
    registered: bool,
}

struct TaskSlot {
    state: Mutex<SlotState>,
    done: Condvar,
}

impl TaskSlot {
    fn new(record: TaskRecord) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                record,
                hooks: Vec::new(),
                observed: false,
                registered: false,
            }),
            done: Condvar::new(),
        })
    }

    /// Take a terminal `record` and run the hooks waiting for it.
    fn settle(&self, record: TaskRecord) {
        let hooks = {
            let mut state = lock(&self.state);
            if state.record.status.is_terminal() {
                return;
            }
            state.record = record.clone();
            self.done.notify_all();
            std::mem::take(&mut state.hooks)
        };
        for hook in hooks {
            hook(&record);
        }
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct TaskTable {
    slots: Arc<Mutex<HashMap<TaskId, Arc<TaskSlot>>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: TaskId) -> Arc<TaskSlot> {
        lock(&self.slots)
            .entry(id)
            .or_insert_with(|| TaskSlot::new(TaskRecord::new(id)))
            .clone()
    }

    /// Claim a submitted task and get a promise for it.
    pub fn register(&self, id: TaskId, session: &str, method: &str) -> TaskPromise {
        let slot = self.slot(id);
        let finished = {
            let mut state = lock(&slot.state);
            state.record.session = Some(session.to_string());
            state.record.method = method.to_string();
            state.registered = true;
            state.record.status == TaskStatus::Finished
        };
        if finished {
            self.forget(id);
        }
        TaskPromise {
            id,
            slot,
            table: Some(self.clone()),
        }
    }

    /// Record a status change. Completion hooks run after the slot lock is
    /// released.
    pub fn apply(&self, update: TaskUpdate) {
        let slot = self.slot(update.id);
        let (hooks, record, drop_slot) = {
            let mut state = lock(&slot.state);
            if state.record.status.is_terminal() {
                tracing::warn!(
                    task = update.id,
                    status = %update.status,
                    "update for finished task ignored"
                );
                return;
            }

            let record = &mut state.record;
            record.status = update.status;
            record.updated_at = Utc::now();
            if update.progress.is_some() {
                record.progress = update.progress;
            }
            if update.result.is_some() {
                record.result = update.result;
            }
            if update.error.is_some() {
                record.error = update.error;
            }

            if !record.status.is_terminal() {
                return;
            }
            tracing::info!(
                task = record.id,
                method = %record.method,
                status = %record.status,
                "task completed"
            );
            slot.done.notify_all();
            let drop_slot = state.registered && state.record.status == TaskStatus::Finished;
            (std::mem::take(&mut state.hooks), state.record.clone(), drop_slot)
        };

        if drop_slot {
            self.forget(record.id);
        }
        for hook in hooks {
            hook(&record);
        }
    }

    /// A promise for a task still in the table.
    pub fn promise(&self, id: TaskId) -> Option<TaskPromise> {
        let slot = lock(&self.slots).get(&id).cloned()?;
        Some(TaskPromise {
            id,
            slot,
            table: Some(self.clone()),
        })
    }

    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        let slot = lock(&self.slots).get(&id).cloned()?;
        let record = lock(&slot.state).record.clone();
        Some(record)
    }

    /// Tasks of `session` still running, plus failures nobody waited on.
    pub fn pending(&self, session: &str) -> Vec<TaskRecord> {
        let slots: Vec<Arc<TaskSlot>> = lock(&self.slots).values().cloned().collect();
        let mut records: Vec<TaskRecord> = slots
            .iter()
            .filter_map(|slot| {
                let state = lock(&slot.state);
                let record = &state.record;
                let unresolved = !record.status.is_terminal()
                    || (record.status != TaskStatus::Finished && !state.observed);
                (unresolved && record.session.as_deref() == Some(session)).then(|| record.clone())
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn forget(&self, id: TaskId) {
        lock(&self.slots).remove(&id);
    }
}

/// Handle for one submitted task.
#[derive(Clone)]
pub struct TaskPromise {
    id: TaskId,
    slot: Arc<TaskSlot>,
    table: Option<TaskTable>,
}

impl TaskPromise {
    /// A promise for work that already completed synchronously.
    pub fn resolved(method: &str, outcome: Result<Json>) -> Self {
        let mut record = TaskRecord::new(0);
        record.method = method.to_string();
        match outcome {
            Ok(result) => {
                record.status = TaskStatus::Finished;
                record.result = Some(result);
            }
            Err(err) => {
                record.status = TaskStatus::Failed;
                record.error = Some(err.to_string());
            }
        }
        Self {
            id: 0,
            slot: TaskSlot::new(record),
            table: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        lock(&self.slot.state).record.status
    }

    pub fn record(&self) -> TaskRecord {
        lock(&self.slot.state).record.clone()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Run `hook` once the task reaches a terminal state. Runs immediately if
    /// it already has.
    pub fn on_complete(&self, hook: impl FnOnce(&TaskRecord) + Send + 'static) {
        let record = {
            let mut state = lock(&self.slot.state);
            if !state.record.status.is_terminal() {
                state.hooks.push(Box::new(hook));
                return;
            }
            state.record.clone()
        };
        hook(&record);
    }

    /// A promise that settles when this one does, with a successful result
    /// passed through `f`. It shares the task id but is not tracked by the
    /// table.
    pub fn map(&self, f: impl FnOnce(Json) -> Json + Send + 'static) -> TaskPromise {
        let mut record = self.record();
        if record.status.is_terminal() {
            record.status = TaskStatus::Pending;
        }
        record.result = None;
        record.error = None;
        let slot = TaskSlot::new(record);

        let derived = slot.clone();
        self.on_complete(move |record| {
            let mut record = record.clone();
            if record.status == TaskStatus::Finished {
                record.result = Some(f(record.result.take().unwrap_or(Json::Null)));
            }
            derived.settle(record);
        });

        TaskPromise {
            id: self.id,
            slot,
            table: None,
        }
    }

    /// Block until the task finishes. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<TaskRecord> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.slot.state);
        while !state.record.status.is_terminal() {
            match deadline {
                None => {
                    state = self
                        .slot
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(NshError::Timeout {
                            method: format!("task #{}", self.id),
                            timeout: timeout.unwrap_or_default(),
                        });
                    }
                    let (guard, _) = self
                        .slot
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }

        state.observed = true;
        let record = state.record.clone();
        drop(state);

        if let Some(table) = &self.table {
            table.forget(self.id);
        }

        match record.status {
            TaskStatus::Finished => Ok(record),
            _ => Err(NshError::TaskFailed {
                id: record.id,
                message: record.error.unwrap_or_else(|| record.status.to_string()),
            }),
        }
    }
}

impl fmt::Debug for TaskPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPromise")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
