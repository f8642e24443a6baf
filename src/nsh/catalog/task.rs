use crate::error::Result;
use crate::namespace::{CollectionBuilder, Namespace};
use crate::property::PropertyMapping;
use crate::remote::memory::TASK_COLLECTION;
use crate::remote::Connection;
use crate::store::load::QueryLoader;
use crate::value::ValueType;

/// Remote task history. Read-only.
pub fn tasks(connection: &Connection) -> Result<Namespace> {
    CollectionBuilder::new("task")
        .describe("Submitted tasks")
        .primary_key("id")
        .property(PropertyMapping::new("id", "id").typed(ValueType::Number).read_only())
        .property(PropertyMapping::new("name", "name").describe("Method").read_only())
        .property(
            PropertyMapping::new("state", "state")
                .choices(&["CREATED", "EXECUTING", "FINISHED", "FAILED", "ABORTED"])
                .read_only(),
        )
        .property(
            PropertyMapping::new("timestamp", "timestamp")
                .typed(ValueType::Time)
                .read_only(),
        )
        .property(PropertyMapping::new("error", "error").read_only())
        .loader(QueryLoader::new(connection.clone(), TASK_COLLECTION, "id"))
        .build()
}
