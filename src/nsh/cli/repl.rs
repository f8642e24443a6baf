use super::render::{render, Format};
use colored::Colorize;
use nsh::error::{NshError, Result};
use nsh::output::Output;
use nsh::session::Session;
use std::io::{self, BufRead, IsTerminal, Write};

const EXIT_WORDS: &[&str] = &["exit", "quit"];

/// Renders results for one session, honouring `--json` and the
/// `output_format` variable.
pub struct Printer {
    force_json: bool,
}

impl Printer {
    pub fn new(force_json: bool) -> Self {
        Self { force_json }
    }

    fn format(&self, session: &Session) -> Format {
        let json = self.force_json
            || session.variables().text("output_format").as_deref() == Some("json");
        if json {
            Format::Json
        } else {
            Format::Text
        }
    }

    pub fn print(&self, session: &Session, outputs: &[Output]) {
        let format = self.format(session);
        for output in outputs.iter().filter(|o| !o.is_none()) {
            let text = render(output, format);
            if !text.is_empty() {
                println!("{}", text);
            }
        }
    }

    pub fn error(&self, session: &Session, err: &NshError) {
        eprintln!("{} {}", "Error:".red(), err);
        if session.variables().flag("debug") {
            eprintln!("{}", format!("{:?}", err).dimmed());
        }
    }
}

/// Run `text` and print what it produced.
pub fn run_text(session: &mut Session, printer: &Printer, text: &str) -> Result<()> {
    let outputs = session.eval(text)?;
    printer.print(session, &outputs);
    Ok(())
}

/// The interactive loop. Errors are reported and the loop continues;
/// it ends on EOF or `exit`.
pub fn run(session: &mut Session, printer: &Printer) -> Result<()> {
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let mut lines = stdin.lock().lines();

    loop {
        if interactive {
            print!("{}", session.prompt());
            io::stdout().flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&trimmed) {
            break;
        }
        if let Err(err) = run_text(session, printer, &line) {
            printer.error(session, &err);
        }
    }

    warn_pending(session);
    Ok(())
}

/// Mention tasks still outstanding when the shell goes away.
pub fn warn_pending(session: &Session) {
    let pending = session.pending_tasks();
    if pending.is_empty() {
        return;
    }
    tracing::info!(count = pending.len(), "leaving with unresolved tasks");
    for record in pending {
        eprintln!(
            "{}",
            format!("Task #{} {} is still {}", record.id, record.method, record.status).yellow()
        );
    }
}
