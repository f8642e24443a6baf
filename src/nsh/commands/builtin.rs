//! Builtins: commands available in every namespace.
//!
//! These are the only commands that change session state. Each is a unit
//! struct; [`builtins`] lists them in the order `?` shows them.

use super::{Command, CommandTable, Invocation};
use crate::config;
use crate::error::{NshError, Result};
use crate::namespace::Namespace;
use crate::output::{ObjectItem, Output, Table};
use crate::property::{PropertyMapping, PropertySet};
use crate::session::Session;
use crate::task::TaskId;
use crate::value::{Value, ValueType};

pub fn builtins() -> CommandTable {
    CommandTable::new()
        .with("cd", Cd)
        .with("top", Top)
        .with("?", Index)
        .with("alias", Alias)
        .with("unalias", Unalias)
        .with("setopt", SetOpt)
        .with("printopt", PrintOpt)
        .with("saveopt", SaveOpt)
        .with("echo", Echo)
        .with("source", Source)
        .with("pending", Pending)
        .with("wait", Wait)
        .with("abort", Abort)
}

fn task_id(raw: &str) -> Result<TaskId> {
    raw.parse()
        .map_err(|_| NshError::coercion(raw, ValueType::Number))
}

pub struct Cd;

impl Command for Cd {
    fn description(&self) -> &str {
        "Change namespace: .., -, /, a/b"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(1, "cd [<path>]")?;
        match inv.arg(0) {
            Some(path) => session.navigate(path)?,
            None => session.top(),
        }
        Ok(Output::None)
    }
}

pub struct Top;

impl Command for Top {
    fn description(&self) -> &str {
        "Go to the root namespace"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(0, "top")?;
        session.top();
        Ok(Output::None)
    }
}

/// Lists child namespaces, commands and builtins of the target.
pub struct Index;

impl Command for Index {
    fn description(&self) -> &str {
        "List namespaces and commands"
    }

    fn run(&self, session: &mut Session, target: &Namespace, _inv: &Invocation) -> Result<Output> {
        let mut lines = Vec::new();

        let children = target.namespaces();
        if !children.is_empty() {
            lines.push("Namespaces:".to_string());
            for child in &children {
                lines.push(format!("  {:<16} {}", child.name(), child.description()));
            }
        }

        let commands = target.command_names();
        if !commands.is_empty() {
            lines.push("Commands:".to_string());
            for name in commands {
                let description = target
                    .command(&name)
                    .map(|c| c.description().to_string())
                    .unwrap_or_default();
                lines.push(format!("  {:<16} {}", name, description));
            }
        }

        lines.push("Builtins:".to_string());
        for (name, command) in session.builtins().iter() {
            lines.push(format!("  {:<16} {}", name, command.description()));
        }

        if let Some(props) = target.properties().filter(|p| !p.is_empty()) {
            lines.push("Properties:".to_string());
            for mapping in props.iter() {
                lines.push(format!("  {:<16} {}", mapping.name, mapping.value_type));
            }
        }
        Ok(Output::Text(lines.join("\n")))
    }
}

pub struct Alias;

impl Command for Alias {
    fn description(&self) -> &str {
        "Define or list aliases"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(2, "alias [<name> [<expansion>]] | alias <name>=<expansion>")?;
        for (name, expansion) in &inv.kwargs {
            session.set_alias(name, expansion);
        }

        match (inv.arg(0), inv.arg(1)) {
            (Some(name), Some(expansion)) => {
                session.set_alias(name, expansion);
                Ok(Output::None)
            }
            (Some(name), None) => session
                .expand_alias(name)
                .map(|e| Output::Text(format!("{}={}", name, e)))
                .ok_or_else(|| NshError::not_found(name, "aliases")),
            _ if !inv.kwargs.is_empty() => Ok(Output::None),
            _ => Ok(Output::Text(
                session
                    .aliases()
                    .iter()
                    .map(|(name, expansion)| format!("{}={}", name, expansion))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
        }
    }
}

pub struct Unalias;

impl Command for Unalias {
    fn description(&self) -> &str {
        "Remove an alias"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.expect_args(1, "unalias <name>")?;
        session.remove_alias(inv.arg(0).unwrap_or_default())?;
        Ok(Output::None)
    }
}

pub struct SetOpt;

impl Command for SetOpt {
    fn description(&self) -> &str {
        "Set session variables"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        if inv.kwargs.is_empty() || !inv.args.is_empty() {
            return Err(NshError::Arity("setopt <name>=<value> ...".to_string()));
        }
        for (name, value) in &inv.kwargs {
            session.set_variable(name, value)?;
        }
        Ok(Output::None)
    }
}

pub struct PrintOpt;

impl Command for PrintOpt {
    fn description(&self) -> &str {
        "Show session variables"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        let item = |name: &str, value: &Value| ObjectItem {
            name: name.to_string(),
            description: config::definition(name)
                .map(|def| def.description.to_string())
                .unwrap_or_default(),
            value: value.clone(),
            editable: true,
        };

        let items = if inv.args.is_empty() {
            session
                .variables()
                .iter()
                .map(|(name, value)| item(name, value))
                .collect()
        } else {
            inv.args
                .iter()
                .map(|name| {
                    session
                        .variables()
                        .get(name)
                        .map(|value| item(name, value))
                        .ok_or_else(|| NshError::not_found(name.clone(), "variables"))
                })
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Output::Object(items))
    }
}

pub struct SaveOpt;

impl Command for SaveOpt {
    fn description(&self) -> &str {
        "Write session variables to the config file"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(0, "saveopt")?;
        let path = session.save_variables()?;
        Ok(Output::Text(format!("Saved to {}", path.display())))
    }
}

pub struct Echo;

impl Command for Echo {
    fn description(&self) -> &str {
        "Print arguments"
    }

    fn run(&self, _session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        let words = inv
            .args
            .iter()
            .cloned()
            .chain(inv.kwargs.iter().map(|(k, v)| format!("{}={}", k, v)))
            .chain(inv.opargs.iter().map(|o| format!("{}{}{}", o.key, o.op, o.value)));
        Ok(Output::Text(words.collect::<Vec<_>>().join(" ")))
    }
}

/// Runs a script; the first failing statement aborts the rest.
pub struct Source;

impl Command for Source {
    fn description(&self) -> &str {
        "Run commands from a file"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.expect_args(1, "source <file>")?;
        let outputs = session.source(inv.arg(0).unwrap_or_default())?;
        Ok(Output::Sequence(
            outputs.into_iter().filter(|o| !o.is_none()).collect(),
        ))
    }
}

fn task_properties() -> Result<PropertySet> {
    PropertySet::new(vec![
        PropertyMapping::new("id", "id").typed(ValueType::Number),
        PropertyMapping::new("method", "method"),
        PropertyMapping::new("status", "status").typed(ValueType::Enum),
        PropertyMapping::new("progress", "progress").typed(ValueType::Number),
        PropertyMapping::new("error", "error"),
        PropertyMapping::new("created_at", "created_at").typed(ValueType::Time),
    ])
}

/// Tasks of this session still running, and failures nobody waited on.
pub struct Pending;

impl Command for Pending {
    fn description(&self) -> &str {
        "List unresolved tasks"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(0, "pending")?;
        let rows = session
            .pending_tasks()
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;
        Ok(Output::Table(Table::from_properties(&task_properties()?, rows)))
    }
}

pub struct Wait;

impl Command for Wait {
    fn description(&self) -> &str {
        "Wait for a task, the last one by default"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.max_args(1, "wait [<task id>]")?;
        let promise = match inv.arg(0) {
            Some(raw) => {
                let id = task_id(raw)?;
                session
                    .connection()
                    .tasks()
                    .promise(id)
                    .ok_or_else(|| NshError::not_found(format!("task #{}", id), "pending tasks"))?
            }
            None => session
                .last_task()
                .cloned()
                .ok_or_else(|| NshError::Command("no task to wait for".to_string()))?,
        };
        promise.wait(None)?;
        Ok(Output::Task(promise))
    }
}

/// Best-effort: a task that finishes anyway counts as finished.
pub struct Abort;

impl Command for Abort {
    fn description(&self) -> &str {
        "Ask the remote to cancel a task"
    }

    fn run(&self, session: &mut Session, _target: &Namespace, inv: &Invocation) -> Result<Output> {
        inv.expect_args(1, "abort <task id>")?;
        let id = task_id(inv.arg(0).unwrap_or_default())?;
        session.connection().abort(id)?;
        Ok(Output::None)
    }
}
