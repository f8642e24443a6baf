//! # Remote Layer
//!
//! The shell never talks to a backend directly. It goes through a
//! [`Transport`], which offers exactly three things:
//!
//! - `call_sync`: a blocking RPC with a timeout (listings, lookups)
//! - `submit_task`: start a mutating task and return its id immediately
//! - `abort_task`: ask for cancellation, best-effort
//!
//! Task progress is not returned from `submit_task`; the transport pushes it
//! into the shared [`TaskTable`]. [`Connection`] bundles a transport with that
//! table, the session id and the current call timeout, and is what the rest
//! of the crate holds.
//!
//! [`memory::InMemoryRemote`] is the in-process implementation used by the
//! bundled binary and by tests.

use crate::error::Result;
use crate::task::{TaskId, TaskPromise, TaskTable};
use serde_json::Value as Json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub mod memory;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub trait Transport: Send + Sync {
    fn call_sync(&self, method: &str, args: &[Json], timeout: Duration) -> Result<Json>;

    fn submit_task(&self, method: &str, args: &[Json]) -> Result<TaskId>;

    fn abort_task(&self, id: TaskId) -> Result<()>;
}

#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    tasks: TaskTable,
    session_id: String,
    timeout_secs: Arc<AtomicU64>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, tasks: TaskTable) -> Self {
        Self {
            transport,
            tasks,
            session_id: Uuid::new_v4().to_string(),
            timeout_secs: Arc::new(AtomicU64::new(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_secs.store(timeout.as_secs(), Ordering::Relaxed);
    }

    pub fn call(&self, method: &str, args: &[Json]) -> Result<Json> {
        tracing::debug!(method, args = args.len(), "call");
        self.transport.call_sync(method, args, self.timeout())
    }

    pub fn submit(&self, method: &str, args: &[Json]) -> Result<TaskPromise> {
        let id = self.transport.submit_task(method, args)?;
        tracing::info!(task = id, method, "task submitted");
        Ok(self.tasks.register(id, &self.session_id, method))
    }

    pub fn abort(&self, id: TaskId) -> Result<()> {
        tracing::info!(task = id, "abort requested");
        self.transport.abort_task(id)
    }
}
