use super::SaveStrategy;
use crate::error::Result;
use crate::model::Entity;
use crate::remote::Connection;
use crate::task::TaskPromise;
use serde_json::Value as Json;

fn with_extra(first: Json, extra: &[Json]) -> Vec<Json> {
    std::iter::once(first).chain(extra.iter().cloned()).collect()
}

/// Submits `<namespace>.create|update|delete` tasks.
pub struct TaskSaver {
    connection: Connection,
    namespace: String,
}

impl TaskSaver {
    pub fn new(connection: Connection, namespace: &str) -> Self {
        Self {
            connection,
            namespace: namespace.to_string(),
        }
    }

    fn method(&self, op: &str) -> String {
        format!("{}.{}", self.namespace, op)
    }
}

impl SaveStrategy for TaskSaver {
    fn create(&self, entity: &Entity, extra: &[Json]) -> Result<TaskPromise> {
        self.connection
            .submit(&self.method("create"), &with_extra(entity.clone(), extra))
    }

    fn update(&self, key: &Json, entity: &Entity) -> Result<TaskPromise> {
        self.connection
            .submit(&self.method("update"), &[key.clone(), entity.clone()])
    }

    fn delete(&self, key: &Json, extra: &[Json]) -> Result<TaskPromise> {
        self.connection
            .submit(&self.method("delete"), &with_extra(key.clone(), extra))
    }
}

/// Performs the same operations as blocking calls.
pub struct CallSaver {
    connection: Connection,
    namespace: String,
}

impl CallSaver {
    pub fn new(connection: Connection, namespace: &str) -> Self {
        Self {
            connection,
            namespace: namespace.to_string(),
        }
    }

    fn call(&self, op: &str, args: &[Json]) -> TaskPromise {
        let method = format!("{}.{}", self.namespace, op);
        TaskPromise::resolved(&method, self.connection.call(&method, args))
    }
}

impl SaveStrategy for CallSaver {
    fn create(&self, entity: &Entity, extra: &[Json]) -> Result<TaskPromise> {
        Ok(self.call("create", &with_extra(entity.clone(), extra)))
    }

    fn update(&self, key: &Json, entity: &Entity) -> Result<TaskPromise> {
        Ok(self.call("update", &[key.clone(), entity.clone()]))
    }

    fn delete(&self, key: &Json, extra: &[Json]) -> Result<TaskPromise> {
        Ok(self.call("delete", &with_extra(key.clone(), extra)))
    }
}
