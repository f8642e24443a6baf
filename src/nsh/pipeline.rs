//! # Pipeline Engine
//!
//! Executes one parsed statement:
//!
//! 1. every stage after the first must be a filter, and a must-be-last
//!    filter may only close the pipeline; both are checked before anything
//!    runs
//! 2. an alias in the first word is expanded
//! 3. the first stage is resolved to a target namespace and a command
//! 4. each filter folds into one [`Query`], which the command receives
//! 5. a command that does not consume the query gets it applied to its
//!    table output instead
//! 6. each filter's `run` transforms the output of the stage before it
//!
//! A first stage without a command navigates, unless filters follow, in
//! which case it means `show`.

use crate::commands::{FilterCommand, Invocation};
use crate::dispatch::{dispatch, resolve_stage};
use crate::error::{NshError, Result};
use crate::namespace::path_string;
use crate::output::Output;
use crate::parse::{parse_line, Pipeline, Stage};
use crate::query::Query;
use crate::session::Session;
use std::sync::Arc;

struct FilterStage {
    name: String,
    filter: Arc<dyn FilterCommand>,
    inv: Invocation,
}

fn check_composition(session: &Session, pipeline: &Pipeline) -> Result<Vec<FilterStage>> {
    let last = pipeline.stages.len().saturating_sub(1);
    let mut stages = Vec::new();
    for (index, stage) in pipeline.stages.iter().enumerate().skip(1) {
        let name = stage
            .words
            .first()
            .ok_or_else(|| NshError::Syntax("filter stage without a name".to_string()))?;
        let filter = session
            .filter(name)
            .ok_or_else(|| NshError::Composition(format!("{} is not a filter", name)))?;
        if filter.must_be_last() && index != last {
            return Err(NshError::Composition(format!(
                "{} must be the last stage",
                name
            )));
        }
        stages.push(FilterStage {
            name: name.clone(),
            filter,
            inv: Invocation::from_stage(stage),
        });
    }
    Ok(stages)
}

/// Replace an aliased first word with its expansion.
fn expand_alias(session: &Session, stage: &Stage) -> Result<Stage> {
    let Some(expansion) = stage.words.first().and_then(|w| session.expand_alias(w)) else {
        return Ok(stage.clone());
    };

    let mut parsed = parse_line(expansion)?;
    let alias_stage = match (parsed.len(), parsed.first_mut()) {
        (1, Some(pipeline)) if pipeline.stages.len() == 1 => pipeline.stages.remove(0),
        _ => {
            return Err(NshError::Composition(format!(
                "alias {} must expand to a single command",
                stage.words[0]
            )))
        }
    };

    let mut expanded = alias_stage;
    expanded.words.extend(stage.words.iter().skip(1).cloned());
    expanded.kwargs.extend(stage.kwargs.iter().cloned());
    expanded.opargs.extend(stage.opargs.iter().cloned());
    Ok(expanded)
}

pub fn execute(session: &mut Session, pipeline: &Pipeline) -> Result<Output> {
    let Some(first) = pipeline.stages.first() else {
        return Ok(Output::None);
    };
    let filters = check_composition(session, pipeline)?;
    let first = expand_alias(session, first)?;
    let resolved = resolve_stage(session, &first.words)?;
    let target = resolved.target().clone();

    let mut query = Query::default();
    for stage in &filters {
        stage.filter.fold(&target, &stage.inv, &mut query)?;
    }
    tracing::debug!(stages = pipeline.stages.len(), ?query, "pipeline");

    let (name, command) = match resolved.command {
        Some(found) => found,
        None if filters.is_empty() => {
            if !first.kwargs.is_empty() || !first.opargs.is_empty() {
                return Err(NshError::Syntax(format!(
                    "arguments given without a command in {}",
                    path_string(&resolved.path)
                )));
            }
            session.navigate_to(resolved.path);
            return Ok(Output::None);
        }
        None => {
            let show = target
                .command("show")
                .ok_or_else(|| NshError::not_found("show", path_string(&resolved.path)))?;
            ("show".to_string(), show)
        }
    };

    let inv = Invocation {
        args: resolved.args,
        kwargs: first.kwargs,
        opargs: first.opargs,
        query: query.clone(),
    };
    let mut output = dispatch(session, &target, &name, command.as_ref(), &inv)?;
    if !command.consumes_query() {
        output = output.apply_query(&query);
    }

    for stage in &filters {
        tracing::debug!(filter = %stage.name, "filter run");
        output = stage.filter.run(&target, &stage.inv, output)?;
    }

    if let Output::Task(promise) = &output {
        session.set_last_task(promise.clone());
        if session.variables().flag("tasks_blocking") {
            promise.wait(None)?;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Table;
    use crate::test_utils::Fixture;
    use crate::value::Value;
    use serde_json::json;

    fn run(session: &mut Session, line: &str) -> Result<Output> {
        let mut outputs = session.eval(line)?;
        Ok(outputs.pop().unwrap_or_default())
    }

    fn table(output: Output) -> Table {
        match output {
            Output::Table(table) => table,
            other => panic!("expected a table, got {other:?}"),
        }
    }

    #[test]
    fn composition_errors_happen_before_any_fetch() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let err = run(&mut session, "account user show | more | limit 2").unwrap_err();
        assert!(matches!(err, NshError::Composition(_)));
        let err = run(&mut session, "account user show | cd /").unwrap_err();
        assert!(matches!(err, NshError::Composition(_)));
        assert!(fx.remote.calls().is_empty());
    }

    #[test]
    fn filters_fold_into_one_query() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let out = run(&mut session, "account user show | search uid>=1000 | sort -uid | limit 1").unwrap();
        let rows = table(out).rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], json!("bob"));
        assert_eq!(fx.remote.calls(), vec!["account.user.query"]);
    }

    #[test]
    fn bare_path_with_filters_means_show() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let out = run(&mut session, "account user | limit 2").unwrap();
        assert_eq!(table(out).len(), 2);
        assert_eq!(session.path_string(), "/");
    }

    #[test]
    fn bare_path_navigates() {
        let fx = Fixture::new();
        let mut session = fx.session();
        assert!(run(&mut session, "account user").unwrap().is_none());
        assert_eq!(session.path_string(), "/account/user");
    }

    #[test]
    fn find_returns_key_or_null() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let out = run(&mut session, "account user show | find uid=1001").unwrap();
        assert!(matches!(out, Output::Value(Value::String(ref s)) if s == "alice"));
        let out = run(&mut session, "account user show | find uid=4242").unwrap();
        assert!(matches!(out, Output::Value(Value::Null)));
    }

    #[test]
    fn select_projects_after_fetch() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let out = run(&mut session, "account user show | sort username | select username").unwrap();
        assert_eq!(
            table(out).to_json(),
            json!([{"username": "alice"}, {"username": "bob"}, {"username": "root"}])
        );
    }

    #[test]
    fn aliases_expand_first_word() {
        let fx = Fixture::new();
        let mut session = fx.session();
        run(&mut session, "alias users \"account user show\"").unwrap();
        let out = run(&mut session, "users | limit 1").unwrap();
        assert_eq!(table(out).len(), 1);
    }

    #[test]
    fn blocking_tasks_surface_failures() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.set_variable("tasks_blocking", "yes").unwrap();
        fx.remote.fail_next("account.user.create", "uid taken");
        let err = run(&mut session, "account user create dave uid=1001").unwrap_err();
        assert!(matches!(err, NshError::TaskFailed { .. }));
        assert!(session.last_task().is_some());
    }
}
