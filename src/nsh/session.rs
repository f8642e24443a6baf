//! # Session Context
//!
//! Everything that outlives a single pipeline: the current path and the
//! previous one (for `cd -`), aliases, session variables, the connection to
//! the remote, and the builtin and filter registries. There is no ambient
//! global state; commands receive the session explicitly.

use crate::commands::builtin::builtins;
use crate::commands::filter::filters;
use crate::commands::{Command, CommandTable, FilterCommand, FilterTable};
use crate::config::{self, Variables};
use crate::error::{NshError, Result};
use crate::namespace::{path_string, resolve, Namespace};
use crate::output::Output;
use crate::parse::parse_script;
use crate::pipeline;
use crate::remote::Connection;
use crate::task::{TaskPromise, TaskRecord};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct Session {
    path: Vec<Namespace>,
    previous: Vec<Namespace>,
    aliases: BTreeMap<String, String>,
    variables: Variables,
    connection: Connection,
    builtins: CommandTable,
    filters: FilterTable,
    last_task: Option<TaskPromise>,
    config_path: Option<PathBuf>,
}

impl Session {
    pub fn new(root: Namespace, connection: Connection) -> Self {
        let session = Self {
            path: vec![root],
            previous: Vec::new(),
            aliases: BTreeMap::new(),
            variables: Variables::default(),
            connection,
            builtins: builtins(),
            filters: filters(),
            last_task: None,
            config_path: None,
        };
        session.sync_timeout();
        session
    }

    /// Load variables from `path` and make it the `saveopt` target.
    pub fn with_config(mut self, path: PathBuf) -> Result<Self> {
        self.variables = Variables::load(&path)?;
        self.config_path = Some(path);
        self.sync_timeout();
        Ok(self)
    }

    fn sync_timeout(&self) {
        if let Some(secs) = self.variables.number("timeout").filter(|n| *n > 0) {
            self.connection.set_timeout(Duration::from_secs(secs as u64));
        }
    }

    pub fn root(&self) -> &Namespace {
        &self.path[0]
    }

    pub fn cwd(&self) -> &Namespace {
        &self.path[self.path.len() - 1]
    }

    pub fn path(&self) -> &[Namespace] {
        &self.path
    }

    pub fn previous(&self) -> &[Namespace] {
        &self.previous
    }

    pub fn path_string(&self) -> String {
        path_string(&self.path)
    }

    pub fn navigate(&mut self, spec: &str) -> Result<()> {
        let path = resolve(&self.path, &self.previous, spec)?;
        self.navigate_to(path);
        Ok(())
    }

    pub fn navigate_to(&mut self, path: Vec<Namespace>) {
        if path.is_empty() {
            return;
        }
        let unchanged =
            path.len() == self.path.len() && path.iter().zip(&self.path).all(|(a, b)| a.same(b));
        if unchanged {
            return;
        }
        tracing::debug!(from = %self.path_string(), to = %path_string(&path), "navigate");
        self.previous = std::mem::replace(&mut self.path, path);
    }

    pub fn top(&mut self) {
        let root = self.root().clone();
        self.navigate_to(vec![root]);
    }

    pub fn cd_up(&mut self) {
        if self.path.len() > 1 {
            let parent = self.path[..self.path.len() - 1].to_vec();
            self.navigate_to(parent);
        }
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn set_alias(&mut self, name: &str, expansion: &str) {
        self.aliases.insert(name.to_string(), expansion.to_string());
    }

    pub fn remove_alias(&mut self, name: &str) -> Result<()> {
        self.aliases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NshError::not_found(name, "aliases"))
    }

    pub fn expand_alias(&self, word: &str) -> Option<&str> {
        self.aliases.get(word).map(String::as_str)
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn set_variable(&mut self, name: &str, raw: &str) -> Result<()> {
        self.variables.set(name, raw)?;
        if name == "timeout" {
            self.sync_timeout();
        }
        Ok(())
    }

    /// Write variables to the config file. Returns the path written.
    pub fn save_variables(&self) -> Result<PathBuf> {
        let path = self
            .config_path
            .clone()
            .or_else(config::default_path)
            .ok_or_else(|| NshError::Command("no config location available".to_string()))?;
        self.variables.save(&path)?;
        tracing::info!(path = %path.display(), "variables saved");
        Ok(path)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn builtin(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.builtins.get(name)
    }

    pub fn builtins(&self) -> &CommandTable {
        &self.builtins
    }

    pub fn filter(&self, name: &str) -> Option<Arc<dyn FilterCommand>> {
        self.filters.get(name)
    }

    pub fn filters(&self) -> &FilterTable {
        &self.filters
    }

    pub fn last_task(&self) -> Option<&TaskPromise> {
        self.last_task.as_ref()
    }

    pub fn set_last_task(&mut self, promise: TaskPromise) {
        self.last_task = Some(promise);
    }

    /// Parse and run every statement of `text`, stopping at the first error.
    pub fn eval(&mut self, text: &str) -> Result<Vec<Output>> {
        let pipelines = parse_script(text, |name| self.variables.text(name))?;
        let mut outputs = Vec::with_capacity(pipelines.len());
        for pipeline in &pipelines {
            outputs.push(pipeline::execute(self, pipeline)?);
        }
        Ok(outputs)
    }

    pub fn source<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<Output>> {
        let text = fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "source");
        self.eval(&text)
    }

    pub fn prompt(&self) -> String {
        let template = self
            .variables
            .text("prompt")
            .unwrap_or_else(|| "{path}>".to_string());
        format!("{} ", template.replace("{path}", &self.path_string()))
    }

    /// Tasks this session left unresolved.
    pub fn pending_tasks(&self) -> Vec<TaskRecord> {
        self.connection
            .tasks()
            .pending(self.connection.session_id())
    }
}
