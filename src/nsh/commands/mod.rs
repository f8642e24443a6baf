//! # Command Layer
//!
//! Everything a user can type at the start of a pipeline stage is a
//! [`Command`]; everything that can follow a `|` is a [`FilterCommand`].
//!
//! ## Commands
//!
//! A command runs against a target [`Namespace`] with an [`Invocation`]:
//! positional args, `key=value` kwargs and `key<op>value` opargs, all still
//! raw strings. Coercion happens only where a property mapping or the command
//! itself declares a type. Commands return an [`Output`] and never print.
//!
//! Mutating commands do not wait for the backend: they return
//! `Output::Task` with a promise. Only the pipeline (when `tasks_blocking` is
//! set) or the `wait` builtin blocks on one.
//!
//! Session state (current path, aliases, variables) is only touched by the
//! builtins in [`builtin`].
//!
//! ## Filters
//!
//! Filters take part in two phases. `fold` contributes to the query the
//! primary command hands to its data source; `run` transforms the
//! materialized output. Most filters only fold or only run.
//!
//! ## Modules
//!
//! - [`entity`]: `show`, `create`, `delete` on collections and
//!   `show`, `get`, `set`, `save`, `revert`, `delete` on entities
//! - [`filter`]: `search`, `find`, `exclude`, `older_than`, `newer_than`,
//!   `sort`, `limit`/`head`, `tail`, `select`, `more`/`less`
//! - [`builtin`]: navigation, aliases, variables, scripts and tasks

use crate::error::{NshError, Result};
use crate::namespace::Namespace;
use crate::output::Output;
use crate::parse::{OpArg, Stage};
use crate::query::Query;
use crate::session::Session;
use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod entity;
pub mod filter;

/// Arguments bound to one command run.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub args: Vec<String>,
    pub kwargs: Vec<(String, String)>,
    pub opargs: Vec<OpArg>,
    /// Folded from the filter stages that follow.
    pub query: Query,
}

impl Invocation {
    pub fn with_args(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Bind a filter stage: its first word is the filter name.
    pub fn from_stage(stage: &Stage) -> Self {
        Self {
            args: stage.words.iter().skip(1).cloned().collect(),
            kwargs: stage.kwargs.clone(),
            opargs: stage.opargs.clone(),
            query: Query::default(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Fail with an arity error unless exactly `count` args were given.
    pub fn expect_args(&self, count: usize, usage: &str) -> Result<()> {
        if self.args.len() == count {
            Ok(())
        } else {
            Err(NshError::Arity(usage.to_string()))
        }
    }

    pub fn max_args(&self, count: usize, usage: &str) -> Result<()> {
        if self.args.len() <= count {
            Ok(())
        } else {
            Err(NshError::Arity(usage.to_string()))
        }
    }
}

pub trait Command: Send + Sync {
    fn description(&self) -> &str;

    fn run(&self, session: &mut Session, target: &Namespace, inv: &Invocation) -> Result<Output>;

    /// Whether the command hands `inv.query` to its data source. If not, the
    /// pipeline applies the query to the command's table output itself.
    fn consumes_query(&self) -> bool {
        false
    }
}

pub trait FilterCommand: Send + Sync {
    fn description(&self) -> &str;

    /// Terminal sink: nothing may follow it.
    fn must_be_last(&self) -> bool {
        false
    }

    fn fold(&self, _target: &Namespace, _inv: &Invocation, _query: &mut Query) -> Result<()> {
        Ok(())
    }

    fn run(&self, _target: &Namespace, _inv: &Invocation, input: Output) -> Result<Output> {
        Ok(input)
    }
}

/// Named entries in declaration order. Inserting an existing name replaces it.
pub struct Registry<T: ?Sized> {
    entries: Vec<(String, Arc<T>)>,
}

pub type CommandTable = Registry<dyn Command>;
pub type FilterTable = Registry<dyn FilterCommand>;

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, entry: Arc<T>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = entry,
            None => self.entries.push((name.to_string(), entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entry)| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }
}

impl CommandTable {
    pub fn with(mut self, name: &str, command: impl Command + 'static) -> Self {
        self.insert(name, Arc::new(command));
        self
    }
}

impl FilterTable {
    pub fn with(mut self, name: &str, filter: impl FilterCommand + 'static) -> Self {
        self.insert(name, Arc::new(filter));
        self
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(n, _)| n)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop(&'static str);

    impl Command for Nop {
        fn description(&self) -> &str {
            self.0
        }

        fn run(&self, _: &mut Session, _: &Namespace, _: &Invocation) -> Result<Output> {
            Ok(Output::None)
        }
    }

    #[test]
    fn table_keeps_order_and_replaces_by_name() {
        let table = CommandTable::new()
            .with("show", Nop("first"))
            .with("create", Nop("create"))
            .with("show", Nop("second"));
        assert_eq!(table.names(), vec!["show", "create"]);
        assert_eq!(table.get("show").unwrap().description(), "second");
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn arity_helpers() {
        let inv = Invocation::with_args(&["a", "b"]);
        assert!(inv.expect_args(2, "usage").is_ok());
        assert!(matches!(inv.expect_args(1, "usage"), Err(NshError::Arity(_))));
        assert!(inv.max_args(2, "usage").is_ok());
        assert!(inv.max_args(1, "usage").is_err());
        assert_eq!(inv.arg(1), Some("b"));
        assert_eq!(inv.arg(2), None);
    }
}
