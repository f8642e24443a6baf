use super::Namespace;
use crate::commands::{Command, CommandTable};
use std::sync::Arc;

/// A static node: fixed children and commands.
#[derive(Debug)]
pub struct PlainNamespace {
    name: String,
    description: String,
    children: Vec<Namespace>,
    commands: CommandTable,
}

impl PlainNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children: Vec::new(),
            commands: CommandTable::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn child(mut self, namespace: Namespace) -> Self {
        self.children.push(namespace);
        self
    }

    pub fn command(mut self, name: &str, command: impl Command + 'static) -> Self {
        self.commands.insert(name, Arc::new(command));
        self
    }

    pub fn build(self) -> Namespace {
        Namespace::Plain(Arc::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn children(&self) -> &[Namespace] {
        &self.children
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }
}
