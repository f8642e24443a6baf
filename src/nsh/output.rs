//! Command results.
//!
//! Commands never format for a terminal. They return an [`Output`]: a table of
//! entities with column metadata, a list of named values, a scalar, or a task
//! handle. The renderer in the binary decides how any of these look.

use crate::model::Entity;
use crate::property::{PropertyMapping, PropertySet};
use crate::query::Query;
use crate::task::TaskPromise;
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Column {
    pub label: String,
    pub mapping: Arc<PropertyMapping>,
}

/// Rows are raw entities; cells are computed through each column's mapping.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Entity>,
}

impl Table {
    /// One column per list-visible property.
    pub fn from_properties(properties: &PropertySet, rows: Vec<Entity>) -> Self {
        let columns = properties
            .listed()
            .map(|mapping| Column {
                label: mapping.name.clone(),
                mapping: mapping.clone(),
            })
            .collect();
        Self { columns, rows }
    }

    pub fn cell(&self, row: &Entity, column: &Column) -> Value {
        if column.mapping.is_applicable(row) {
            column.mapping.get(row)
        } else {
            Value::Null
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, label: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub fn to_json(&self) -> Json {
        Json::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Json> = self
                        .columns
                        .iter()
                        .map(|col| (col.label.clone(), self.cell(row, col).to_json()))
                        .collect();
                    Json::Object(object)
                })
                .collect(),
        )
    }
}

/// One line of an entity's `show` output.
#[derive(Debug, Clone)]
pub struct ObjectItem {
    pub name: String,
    pub description: String,
    pub value: Value,
    pub editable: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    None,
    Value(Value),
    Text(String),
    Table(Table),
    Object(Vec<ObjectItem>),
    Task(TaskPromise),
    Sequence(Vec<Output>),
}

impl Output {
    /// Apply `query` to a table. Other outputs pass through.
    pub fn apply_query(self, query: &Query) -> Output {
        match self {
            Output::Table(mut table) if !query.is_empty() => {
                table.rows = query.apply(table.rows);
                Output::Table(table)
            }
            other => other,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Output::None)
    }

    pub fn to_json(&self) -> Json {
        match self {
            Output::None => Json::Null,
            Output::Value(value) => value.to_json(),
            Output::Text(text) => Json::String(text.clone()),
            Output::Table(table) => table.to_json(),
            Output::Object(items) => Json::Object(
                items
                    .iter()
                    .map(|item| (item.name.clone(), item.value.to_json()))
                    .collect(),
            ),
            Output::Task(promise) => {
                serde_json::to_value(promise.record()).unwrap_or(Json::Null)
            }
            Output::Sequence(items) => Json::Array(items.iter().map(Output::to_json).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;
    use crate::value::ValueType;
    use serde_json::json;

    fn table() -> Table {
        let props = PropertySet::new(vec![
            PropertyMapping::new("name", "name"),
            PropertyMapping::new("uid", "uid").typed(ValueType::Number),
            PropertyMapping::new("home", "home").hidden(),
        ])
        .unwrap();
        Table::from_properties(
            &props,
            vec![json!({"name": "b", "uid": 2}), json!({"name": "a", "uid": 1})],
        )
    }

    #[test]
    fn columns_follow_listed_properties() {
        let table = table();
        let labels: Vec<&str> = table.columns.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["name", "uid"]);
        assert_eq!(table.cell(&table.rows[0], &table.columns[1]), Value::Number(2));
    }

    #[test]
    fn apply_query_sorts_tables_only() {
        let query = Query {
            sort: vec![SortKey::parse("name")],
            ..Default::default()
        };
        let Output::Table(sorted) = Output::Table(table()).apply_query(&query) else {
            panic!("expected a table");
        };
        assert_eq!(sorted.rows[0]["name"], json!("a"));

        let text = Output::Text("x".into()).apply_query(&query);
        assert!(matches!(text, Output::Text(_)));
    }

    #[test]
    fn json_form_uses_column_labels() {
        assert_eq!(
            Output::Table(table()).to_json(),
            json!([{"name": "b", "uid": 2}, {"name": "a", "uid": 1}])
        );
    }
}
