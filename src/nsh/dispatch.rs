//! Stage resolution and command dispatch.
//!
//! The words of a stage are walked left to right from the session's current
//! path. A word naming a command of the namespace reached so far (or, failing
//! that, a builtin) stops the walk; the remaining words become positional
//! arguments. Other words descend into children or, if they look like paths,
//! navigate. The walk never changes the session position itself.

use crate::commands::{Command, Invocation};
use crate::error::{NshError, Result};
use crate::namespace::{path_string, resolve, Namespace};
use crate::output::Output;
use crate::session::Session;
use std::sync::Arc;

pub struct Resolved {
    /// Path to the command's target namespace.
    pub path: Vec<Namespace>,
    pub command: Option<(String, Arc<dyn Command>)>,
    pub args: Vec<String>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("command", &self.command.as_ref().map(|(name, _)| name))
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Resolved {
    pub fn target(&self) -> &Namespace {
        &self.path[self.path.len() - 1]
    }
}

fn is_path_token(word: &str) -> bool {
    matches!(word, ".." | "." | "-") || word.contains('/')
}

pub fn resolve_stage(session: &Session, words: &[String]) -> Result<Resolved> {
    let mut path = session.path().to_vec();

    for (index, word) in words.iter().enumerate() {
        let here = path[path.len() - 1].clone();
        let rest = || words[index + 1..].to_vec();

        if let Some(command) = here.command(word) {
            return Ok(Resolved {
                path,
                command: Some((word.clone(), command)),
                args: rest(),
            });
        }
        if is_path_token(word) {
            path = resolve(&path, session.previous(), word)?;
            continue;
        }
        if let Some(child) = here.child(word) {
            path.push(child);
            continue;
        }
        if let Some(command) = session.builtin(word) {
            return Ok(Resolved {
                path,
                command: Some((word.clone(), command)),
                args: rest(),
            });
        }
        return Err(NshError::not_found(word.clone(), path_string(&path)));
    }

    Ok(Resolved {
        path,
        command: None,
        args: Vec::new(),
    })
}

pub fn dispatch(
    session: &mut Session,
    target: &Namespace,
    name: &str,
    command: &dyn Command,
    inv: &Invocation,
) -> Result<Output> {
    tracing::debug!(
        namespace = %target.name(),
        command = name,
        args = ?inv.args,
        kwargs = inv.kwargs.len(),
        "dispatch"
    );
    command.run(session, target, inv)
}
