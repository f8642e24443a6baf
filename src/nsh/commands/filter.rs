//! Filter stages.
//!
//! Query-shaping filters only fold: their effect reaches the data source
//! through the primary command's query. `find` and `select` work on the
//! materialized table, and `more`/`less` are terminal sinks.

use super::{FilterCommand, FilterTable, Invocation};
use crate::error::{NshError, Result};
use crate::model::key_string;
use crate::namespace::Namespace;
use crate::output::{Output, Table};
use crate::property::PropertySet;
use crate::query::{Operator, Predicate, Query, SortKey};
use crate::value::{parse_timedelta, Value, ValueType};
use chrono::{SecondsFormat, Utc};
use serde_json::Value as Json;

pub fn filters() -> FilterTable {
    FilterTable::new()
        .with("search", Search)
        .with("find", Find)
        .with("exclude", Exclude)
        .with("older_than", OlderThan)
        .with("newer_than", NewerThan)
        .with("sort", Sort)
        .with("limit", Limit)
        .with("head", Limit)
        .with("tail", Tail)
        .with("select", Select)
        .with("more", Pager)
        .with("less", Pager)
}

fn properties(target: &Namespace, filter: &str) -> Result<PropertySet> {
    target
        .properties()
        .ok_or_else(|| NshError::Command(format!("{}: {} has no properties", filter, target.name())))
}

/// One comparison per kwarg (`=`) and oparg, in property terms.
fn comparisons(target: &Namespace, inv: &Invocation, filter: &str) -> Result<Vec<Predicate>> {
    if !inv.args.is_empty() || (inv.kwargs.is_empty() && inv.opargs.is_empty()) {
        return Err(NshError::Arity(format!("{} <property><op><value> ...", filter)));
    }
    let props = properties(target, filter)?;

    let terms = inv
        .kwargs
        .iter()
        .map(|(key, value)| (key, Operator::Eq, value))
        .chain(inv.opargs.iter().map(|op| (&op.key, op.op, &op.value)));

    let mut predicates = Vec::new();
    for (name, op, raw) in terms {
        let mapping = props.filterable(name)?;
        let field = mapping.field_path().unwrap_or(&mapping.name);
        let raw_match = op == Operator::Match
            || (mapping.value_type == ValueType::Set && matches!(op, Operator::Eq | Operator::Ne));
        let value = if raw_match {
            Json::String(raw.clone())
        } else {
            mapping.coerce(raw)?.to_json()
        };
        predicates.push(Predicate::compare(field, op, value)?);
    }
    Ok(predicates)
}

/// Field behind the `timestamp` property, if the namespace maps one.
fn timestamp_field(target: &Namespace) -> String {
    target
        .properties()
        .and_then(|props| {
            props
                .get("timestamp")
                .and_then(|m| m.field_path().map(str::to_string))
        })
        .unwrap_or_else(|| "timestamp".to_string())
}

fn count_arg(inv: &Invocation, usage: &str) -> Result<usize> {
    inv.expect_args(1, usage)?;
    let raw = inv.arg(0).unwrap_or_default();
    raw.parse()
        .map_err(|_| NshError::coercion(raw, ValueType::Number))
}

pub struct Search;

impl FilterCommand for Search {
    fn description(&self) -> &str {
        "Keep rows matching every comparison"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        for predicate in comparisons(target, inv, "search")? {
            query.push(predicate);
        }
        Ok(())
    }
}

/// Like `search`, then yields the first match's name.
pub struct Find;

impl FilterCommand for Find {
    fn description(&self) -> &str {
        "Name of the first matching row"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        Search.fold(target, inv, query)
    }

    fn run(&self, target: &Namespace, _inv: &Invocation, input: Output) -> Result<Output> {
        let Output::Table(table) = input else {
            return Ok(Output::Value(Value::Null));
        };
        let name = target
            .primary_key()
            .and_then(|pk| table.rows.first().and_then(|row| key_string(row, &pk)));
        Ok(Output::Value(name.map_or(Value::Null, Value::String)))
    }
}

pub struct Exclude;

impl FilterCommand for Exclude {
    fn description(&self) -> &str {
        "Drop rows matching any comparison"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        for predicate in comparisons(target, inv, "exclude")? {
            query.push(Predicate::Nor(vec![predicate]));
        }
        Ok(())
    }
}

fn fold_age(
    target: &Namespace,
    inv: &Invocation,
    query: &mut Query,
    op: Operator,
    usage: &str,
) -> Result<()> {
    inv.expect_args(1, usage)?;
    let raw = inv.arg(0).unwrap_or_default();
    let delta = parse_timedelta(raw)?;
    let cutoff = Utc::now()
        .checked_sub_signed(delta)
        .ok_or_else(|| NshError::coercion(raw, ValueType::Time))?
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let field = timestamp_field(target);
    query.push(Predicate::compare(field.clone(), Operator::Ne, Json::Null)?);
    query.push(Predicate::compare(field, op, Json::String(cutoff))?);
    Ok(())
}

pub struct OlderThan;

impl FilterCommand for OlderThan {
    fn description(&self) -> &str {
        "Keep rows older than hh:mm[:ss]"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        fold_age(target, inv, query, Operator::Le, "older_than <hh:mm[:ss]>")
    }
}

pub struct NewerThan;

impl FilterCommand for NewerThan {
    fn description(&self) -> &str {
        "Keep rows newer than hh:mm[:ss]"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        fold_age(target, inv, query, Operator::Ge, "newer_than <hh:mm[:ss]>")
    }
}

pub struct Sort;

impl FilterCommand for Sort {
    fn description(&self) -> &str {
        "Sort by properties, -name for descending"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        if inv.args.is_empty() {
            return Err(NshError::Arity("sort [-]<property> ...".to_string()));
        }
        let props = properties(target, "sort")?;
        let mut keys = Vec::with_capacity(inv.args.len());
        for arg in &inv.args {
            let key = SortKey::parse(arg);
            let mapping = props.filterable(&key.field)?;
            keys.push(SortKey {
                field: mapping.field_path().unwrap_or(&mapping.name).to_string(),
                descending: key.descending,
            });
        }
        query.set_sort(keys);
        Ok(())
    }
}

pub struct Limit;

impl FilterCommand for Limit {
    fn description(&self) -> &str {
        "Keep the first n rows"
    }

    fn fold(&self, _target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        query.set_limit(count_arg(inv, "limit <n>")?);
        Ok(())
    }
}

/// The n most recent rows, oldest first.
pub struct Tail;

impl FilterCommand for Tail {
    fn description(&self) -> &str {
        "Keep the n most recent rows"
    }

    fn fold(&self, target: &Namespace, inv: &Invocation, query: &mut Query) -> Result<()> {
        let count = count_arg(inv, "tail <n>")?;
        query.set_sort(vec![SortKey {
            field: timestamp_field(target),
            descending: true,
        }]);
        query.set_limit(count);
        query.reverse = true;
        Ok(())
    }
}

pub struct Select;

impl FilterCommand for Select {
    fn description(&self) -> &str {
        "Project one property"
    }

    fn run(&self, _target: &Namespace, inv: &Invocation, input: Output) -> Result<Output> {
        inv.expect_args(1, "select <property>")?;
        let field = inv.arg(0).unwrap_or_default();
        let Output::Table(table) = input else {
            return Err(NshError::Command("select: input is not a table".to_string()));
        };
        let column = table
            .column(field)
            .cloned()
            .ok_or_else(|| NshError::UnknownProperty {
                name: field.to_string(),
                valid: table.columns.iter().map(|c| c.label.clone()).collect(),
            })?;
        Ok(Output::Table(Table {
            columns: vec![column],
            rows: table.rows,
        }))
    }
}

/// `more` and `less`: rendering is the caller's job.
pub struct Pager;

impl FilterCommand for Pager {
    fn description(&self) -> &str {
        "Page the output"
    }

    fn must_be_last(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::OpArg;
    use crate::test_utils::Fixture;
    use serde_json::json;

    fn users(fx: &Fixture) -> Namespace {
        Namespace::Collection(fx.users())
    }

    fn kwargs(pairs: &[(&str, &str)]) -> Invocation {
        Invocation {
            kwargs: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn search_maps_properties_to_fields_and_coerces() {
        let fx = Fixture::new();
        let mut query = Query::default();
        let mut inv = kwargs(&[("username", "root")]);
        inv.opargs.push(OpArg {
            key: "uid".into(),
            op: Operator::Ge,
            value: "1000".into(),
        });
        Search.fold(&users(&fx), &inv, &mut query).unwrap();
        assert_eq!(
            serde_json::to_value(&query.filter).unwrap(),
            json!([
                {"compare": {"field": "username", "op": "=", "value": "root"}},
                {"compare": {"field": "uid", "op": ">=", "value": 1000}}
            ])
        );
    }

    #[test]
    fn unknown_property_lists_filterable_names() {
        let fx = Fixture::new();
        let mut query = Query::default();
        let err = Search
            .fold(&users(&fx), &kwargs(&[("colour", "red")]), &mut query)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Property colour not found, valid properties are: id,username,uid,full_name,shell"
        );
    }

    #[test]
    fn bad_value_fails_coercion() {
        let fx = Fixture::new();
        let mut query = Query::default();
        let err = Search
            .fold(&users(&fx), &kwargs(&[("uid", "many")]), &mut query)
            .unwrap_err();
        assert!(matches!(err, NshError::TypeCoercion { .. }));
    }

    #[test]
    fn exclude_removes_rows_matching_any_comparison() {
        let fx = Fixture::new();
        let mut query = Query::default();
        Exclude
            .fold(
                &users(&fx),
                &kwargs(&[("username", "root"), ("username", "alice")]),
                &mut query,
            )
            .unwrap();
        let rows = query.apply(vec![
            json!({"username": "root"}),
            json!({"username": "alice"}),
            json!({"username": "bob"}),
        ]);
        assert_eq!(rows, vec![json!({"username": "bob"})]);
    }

    #[test]
    fn limit_keeps_smallest_and_checks_arity() {
        let fx = Fixture::new();
        let ns = users(&fx);
        let mut query = Query::default();
        Limit.fold(&ns, &Invocation::with_args(&["5"]), &mut query).unwrap();
        Limit.fold(&ns, &Invocation::with_args(&["2"]), &mut query).unwrap();
        Limit.fold(&ns, &Invocation::with_args(&["9"]), &mut query).unwrap();
        assert_eq!(query.limit, Some(2));

        let err = Limit.fold(&ns, &Invocation::default(), &mut query).unwrap_err();
        assert!(matches!(err, NshError::Arity(_)));
    }

    #[test]
    fn tail_takes_latest_oldest_first() {
        let fx = Fixture::new();
        let mut query = Query::default();
        Tail.fold(&users(&fx), &Invocation::with_args(&["2"]), &mut query)
            .unwrap();
        let rows = query.apply(vec![
            json!({"n": 1, "timestamp": "2024-01-01T00:00:00Z"}),
            json!({"n": 2, "timestamp": "2024-01-02T00:00:00Z"}),
            json!({"n": 3, "timestamp": "2024-01-03T00:00:00Z"}),
        ]);
        let ns: Vec<i64> = rows.iter().filter_map(|r| r["n"].as_i64()).collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[test]
    fn older_than_skips_rows_without_timestamp() {
        let fx = Fixture::new();
        let mut query = Query::default();
        OlderThan
            .fold(&users(&fx), &Invocation::with_args(&["1:00"]), &mut query)
            .unwrap();
        let rows = query.apply(vec![
            json!({"n": 1, "timestamp": "2000-01-01T00:00:00Z"}),
            json!({"n": 2}),
            json!({"n": 3, "timestamp": "2999-01-01T00:00:00Z"}),
        ]);
        assert_eq!(rows, vec![json!({"n": 1, "timestamp": "2000-01-01T00:00:00Z"})]);
    }

    #[test]
    fn newer_than_keeps_recent_rows() {
        let fx = Fixture::new();
        let mut query = Query::default();
        NewerThan
            .fold(&users(&fx), &Invocation::with_args(&["0:30"]), &mut query)
            .unwrap();
        let recent = (Utc::now() - chrono::TimeDelta::try_minutes(5).unwrap())
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let rows = query.apply(vec![
            json!({"n": 1, "timestamp": "2000-01-01T00:00:00Z"}),
            json!({"n": 2}),
            json!({"n": 3, "timestamp": recent}),
        ]);
        let ns: Vec<i64> = rows.iter().filter_map(|r| r["n"].as_i64()).collect();
        assert_eq!(ns, vec![3]);
    }

    #[test]
    fn age_filters_reject_malformed_durations() {
        let fx = Fixture::new();
        for raw in ["1:99", "abc", "1", "-1:00"] {
            let mut query = Query::default();
            let err = OlderThan
                .fold(&users(&fx), &Invocation::with_args(&[raw]), &mut query)
                .unwrap_err();
            assert!(matches!(err, NshError::TypeCoercion { .. }), "{raw}");
            assert!(query.filter.is_empty(), "{raw}");
        }

        let mut query = Query::default();
        let err = NewerThan
            .fold(&users(&fx), &Invocation::default(), &mut query)
            .unwrap_err();
        assert!(matches!(err, NshError::Arity(_)));
    }

    #[test]
    fn age_beyond_the_calendar_is_a_coercion_error() {
        let fx = Fixture::new();
        let mut query = Query::default();
        let err = OlderThan
            .fold(&users(&fx), &Invocation::with_args(&["9999999999:00"]), &mut query)
            .unwrap_err();
        assert!(matches!(err, NshError::TypeCoercion { .. }));
    }

    #[test]
    fn select_requires_exactly_one_field() {
        let fx = Fixture::new();
        let ns = users(&fx);
        let table = Table::from_properties(
            ns.properties().as_ref().unwrap(),
            vec![json!({"username": "root", "uid": 0})],
        );

        let err = Select
            .run(&ns, &Invocation::with_args(&["username", "uid"]), Output::Table(table.clone()))
            .unwrap_err();
        assert!(matches!(err, NshError::Arity(_)));

        let Output::Table(projected) = Select
            .run(&ns, &Invocation::with_args(&["uid"]), Output::Table(table))
            .unwrap()
        else {
            panic!("expected a table");
        };
        assert_eq!(projected.columns.len(), 1);
        assert_eq!(projected.to_json(), json!([{"uid": 0}]));
    }

    #[test]
    fn find_yields_primary_key_or_null() {
        let fx = Fixture::new();
        let ns = users(&fx);
        let props = ns.properties().unwrap();
        let table = Table::from_properties(&props, vec![json!({"username": "alice"})]);
        let out = Find.run(&ns, &Invocation::default(), Output::Table(table)).unwrap();
        assert!(matches!(out, Output::Value(Value::String(ref s)) if s == "alice"));

        let empty = Table::from_properties(&props, Vec::new());
        let out = Find.run(&ns, &Invocation::default(), Output::Table(empty)).unwrap();
        assert!(matches!(out, Output::Value(Value::Null)));

        let out = Find.run(&ns, &Invocation::default(), Output::Text("x".into())).unwrap();
        assert!(matches!(out, Output::Value(Value::Null)));
    }

    #[test]
    fn only_pagers_must_be_last() {
        let table = filters();
        let last: Vec<String> = table
            .iter()
            .filter(|(_, f)| f.must_be_last())
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(last, vec!["more", "less"]);
    }
}
