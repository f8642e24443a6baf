//! Composed queries.
//!
//! Filter stages in a pipeline do not iterate over rows themselves; they fold
//! into a single [`Query`] which is handed to the data source once. A query
//! is a conjunction of [`Predicate`]s plus sort keys, a limit and a reverse
//! flag. It serializes with serde so a transport can ship it to a server.
//!
//! [`Query::apply`] is the reference evaluator: in-process data sources and
//! commands that do not consume the query themselves go through it.

use crate::error::{NshError, Result};
use crate::model::{get_path, Entity};
use crate::value::json_text;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    /// Regular expression match
    #[serde(rename = "~")]
    Match,
}

impl Operator {
    /// Longest symbols first so `>=` is not read as `>`.
    pub const SYMBOLS: [(&'static str, Operator); 8] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("=", Operator::Eq),
        (">", Operator::Gt),
        ("<", Operator::Lt),
        ("~", Operator::Match),
    ];

    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        Self::SYMBOLS
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, op)| *op)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Match => "~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Compare {
        field: String,
        op: Operator,
        value: Json,
    },
    /// True when none of the inner predicates hold.
    Nor(Vec<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Build a comparison, rejecting patterns that do not compile.
    pub fn compare(field: impl Into<String>, op: Operator, value: Json) -> Result<Self> {
        if op == Operator::Match {
            let pattern = json_text(&value);
            Regex::new(&pattern)
                .map_err(|e| NshError::Command(format!("Invalid pattern '{}': {}", pattern, e)))?;
        }
        Ok(Predicate::Compare {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                let actual = get_path(entity, field).unwrap_or(&Json::Null);
                compare(actual, *op, value)
            }
            Predicate::Nor(inner) => !inner.iter().any(|p| p.matches(entity)),
            Predicate::And(inner) => inner.iter().all(|p| p.matches(entity)),
            Predicate::Or(inner) => inner.iter().any(|p| p.matches(entity)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// `-name` sorts descending.
    pub fn parse(spec: &str) -> SortKey {
        match spec.strip_prefix('-') {
            Some(field) => SortKey {
                field: field.to_string(),
                descending: true,
            },
            None => SortKey {
                field: spec.to_string(),
                descending: false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub reverse: bool,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.sort.is_empty() && self.limit.is_none() && !self.reverse
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.filter.push(predicate);
    }

    /// Later sort stages replace earlier ones.
    pub fn set_sort(&mut self, keys: Vec<SortKey>) {
        self.sort = keys;
    }

    /// Keep the smallest limit seen.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = Some(self.limit.map_or(limit, |current| current.min(limit)));
    }

    /// Query with `base` predicates prepended.
    pub fn with_base(&self, base: &[Predicate]) -> Query {
        let mut query = self.clone();
        query.filter = base.iter().cloned().chain(self.filter.iter().cloned()).collect();
        query
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.filter.iter().all(|p| p.matches(entity))
    }

    /// Filter, then stable-sort, then truncate, then reverse.
    pub fn apply(&self, rows: Vec<Entity>) -> Vec<Entity> {
        let mut rows: Vec<Entity> = rows.into_iter().filter(|row| self.matches(row)).collect();

        if !self.sort.is_empty() {
            rows.sort_by(|a, b| self.compare_rows(a, b));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        if self.reverse {
            rows.reverse();
        }
        rows
    }

    fn compare_rows(&self, a: &Entity, b: &Entity) -> Ordering {
        for key in &self.sort {
            let left = get_path(a, &key.field).unwrap_or(&Json::Null);
            let right = get_path(b, &key.field).unwrap_or(&Json::Null);
            let ordering = sort_order(left, right);
            let ordering = if key.descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn compare(actual: &Json, op: Operator, expected: &Json) -> bool {
    match op {
        Operator::Eq => equals(actual, expected),
        Operator::Ne => !equals(actual, expected),
        Operator::Match => {
            let Ok(re) = Regex::new(&json_text(expected)) else {
                return false;
            };
            match actual {
                Json::Null => false,
                Json::Array(items) => items.iter().any(|i| re.is_match(&json_text(i))),
                other => re.is_match(&json_text(other)),
            }
        }
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let Some(ordering) = ordering(actual, expected) else {
                return false;
            };
            match op {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Ge => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
    }
}

fn equals(actual: &Json, expected: &Json) -> bool {
    match (actual, expected) {
        // A list field equals a scalar when it contains it
        (Json::Array(items), scalar) if !scalar.is_array() => {
            items.iter().any(|item| equals(item, scalar))
        }
        (Json::Null, Json::Null) => true,
        (Json::Null, _) | (_, Json::Null) => false,
        _ => match ordering(actual, expected) {
            Some(ordering) => ordering == Ordering::Equal,
            None => json_text(actual) == json_text(expected),
        },
    }
}

fn ordering(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => match (timestamp(x), timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        (Json::Number(x), Json::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Json::String(x), Json::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

/// Sorting needs a total order: values of different JSON types order by
/// type (null, bool, number, string, list, object), then by value.
/// Timestamps sort chronologically ahead of other strings.
fn sort_order(a: &Json, b: &Json) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| match (a, b) {
            (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
            (Json::Number(x), Json::Number(y)) => match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => fx.total_cmp(&fy),
                _ => x.to_string().cmp(&y.to_string()),
            },
            (Json::String(x), Json::String(y)) => match (timestamp(x), timestamp(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty).then_with(|| x.cmp(y)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => x.cmp(y),
            },
            _ => json_text(a).cmp(&json_text(b)),
        })
}

fn type_rank(value: &Json) -> u8 {
    match value {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

fn timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Vec<Entity> {
        vec![
            json!({"name": "root", "uid": 0, "groups": ["wheel"], "created": "2024-01-01T00:00:00Z"}),
            json!({"name": "alice", "uid": 1001, "groups": ["staff"], "created": "2024-03-01T00:00:00Z"}),
            json!({"name": "bob", "uid": 1002, "groups": ["staff", "wheel"], "created": "2024-02-01T00:00:00Z"}),
            json!({"name": "nobody", "uid": 65534}),
        ]
    }

    fn names(rows: &[Entity]) -> Vec<&str> {
        rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
    }

    fn cmp(field: &str, op: Operator, value: Json) -> Predicate {
        Predicate::compare(field, op, value).unwrap()
    }

    #[test]
    fn operators_parse_from_symbols() {
        assert_eq!(Operator::from_symbol("="), Some(Operator::Eq));
        assert_eq!(Operator::from_symbol("=="), Some(Operator::Eq));
        assert_eq!(Operator::from_symbol(">="), Some(Operator::Ge));
        assert_eq!(Operator::from_symbol("~"), Some(Operator::Match));
        assert_eq!(Operator::from_symbol("=>"), None);
    }

    #[test]
    fn numeric_comparisons() {
        let mut query = Query::default();
        query.push(cmp("uid", Operator::Ge, json!(1000)));
        query.push(cmp("uid", Operator::Lt, json!(60000)));
        assert_eq!(names(&query.apply(users())), vec!["alice", "bob"]);
    }

    #[test]
    fn equality_on_list_means_contains() {
        let mut query = Query::default();
        query.push(cmp("groups", Operator::Eq, json!("wheel")));
        assert_eq!(names(&query.apply(users())), vec!["root", "bob"]);
    }

    #[test]
    fn regex_match_and_invalid_pattern() {
        let mut query = Query::default();
        query.push(cmp("name", Operator::Match, json!("^(a|b)")));
        assert_eq!(names(&query.apply(users())), vec!["alice", "bob"]);

        assert!(Predicate::compare("name", Operator::Match, json!("(")).is_err());
    }

    #[test]
    fn null_comparisons() {
        let mut query = Query::default();
        query.push(cmp("created", Operator::Ne, Json::Null));
        assert_eq!(names(&query.apply(users())), vec!["root", "alice", "bob"]);
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let mut query = Query::default();
        query.push(cmp("created", Operator::Le, json!("2024-02-15T00:00:00+00:00")));
        assert_eq!(names(&query.apply(users())), vec!["root", "bob"]);
    }

    #[test]
    fn nor_excludes_rows_matching_any_comparison() {
        let mut query = Query::default();
        query.push(Predicate::Nor(vec![cmp("name", Operator::Eq, json!("root"))]));
        query.push(Predicate::Nor(vec![cmp("name", Operator::Eq, json!("bob"))]));
        assert_eq!(names(&query.apply(users())), vec!["alice", "nobody"]);
    }

    #[test]
    fn exclude_and_search_partition_the_input() {
        let predicate = cmp("groups", Operator::Eq, json!("staff"));

        let mut search = Query::default();
        search.push(predicate.clone());
        let mut exclude = Query::default();
        exclude.push(Predicate::Nor(vec![predicate]));

        let matched = search.apply(users());
        let rest = exclude.apply(users());
        assert_eq!(matched.len() + rest.len(), users().len());
        assert!(matched.iter().all(|m| !rest.contains(m)));
    }

    #[test]
    fn sort_limit_reverse_apply_in_order() {
        let query = Query {
            sort: vec![SortKey::parse("-uid")],
            limit: Some(3),
            reverse: true,
            ..Default::default()
        };
        assert_eq!(names(&query.apply(users())), vec!["alice", "bob", "nobody"]);
    }

    #[test]
    fn sort_puts_nulls_first() {
        let query = Query {
            sort: vec![SortKey::parse("created")],
            ..Default::default()
        };
        assert_eq!(names(&query.apply(users())), vec!["nobody", "root", "bob", "alice"]);
    }

    #[test]
    fn mixed_types_sort_by_type_then_value() {
        let query = Query {
            sort: vec![SortKey::parse("v")],
            ..Default::default()
        };
        let rows = vec![
            json!({"v": "b"}),
            json!({"v": 50}),
            json!({"v": "100"}),
            json!({"v": true}),
            json!({"v": ["x"]}),
            json!({}),
            json!({"v": "6"}),
            json!({"v": 7}),
            json!({"v": "a"}),
        ];
        let sorted: Vec<Json> = query.apply(rows.clone()).iter().map(|r| r["v"].clone()).collect();
        assert_eq!(
            sorted,
            vec![
                Json::Null,
                json!(true),
                json!(7),
                json!(50),
                json!("100"),
                json!("6"),
                json!("a"),
                json!("b"),
                json!(["x"]),
            ]
        );

        let mut reversed = rows;
        reversed.reverse();
        let again: Vec<Json> = query.apply(reversed).iter().map(|r| r["v"].clone()).collect();
        assert_eq!(again, sorted);
    }

    #[test]
    fn limit_keeps_the_smallest() {
        let mut query = Query::default();
        query.set_limit(5);
        query.set_limit(2);
        query.set_limit(9);
        assert_eq!(query.limit, Some(2));
    }

    #[test]
    fn base_predicates_come_first() {
        let mut query = Query::default();
        query.push(cmp("name", Operator::Eq, json!("bob")));
        let base = vec![cmp("uid", Operator::Gt, json!(0))];
        let combined = query.with_base(&base);
        assert_eq!(combined.filter.len(), 2);
        assert_eq!(combined.filter[0], base[0]);
    }

    #[test]
    fn serializes_for_the_wire() {
        let query = Query {
            filter: vec![cmp("type", Operator::Eq, json!("nfs"))],
            limit: Some(1),
            ..Default::default()
        };
        let wire = serde_json::to_value(&query).unwrap();
        assert_eq!(
            wire,
            json!({
                "filter": [{"compare": {"field": "type", "op": "=", "value": "nfs"}}],
                "limit": 1,
                "reverse": false
            })
        );
        let back: Query = serde_json::from_value(wire).unwrap();
        assert_eq!(back, query);
    }
}
