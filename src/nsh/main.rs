use clap::Parser;
use nsh::catalog::demo_session;
use nsh::config;
use nsh::error::Result;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::args::Cli;
use cli::repl::{self, Printer};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.json || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let (mut session, _remote) = demo_session()?;
    if let Some(path) = cli.config.clone().or_else(config::default_path) {
        tracing::debug!(path = %path.display(), "config");
        session = session.with_config(path)?;
    }

    let printer = Printer::new(cli.json);
    if let Some(command) = &cli.command {
        repl::run_text(&mut session, &printer, command)?;
    } else if let Some(script) = &cli.script {
        let outputs = session.source(script)?;
        printer.print(&session, &outputs);
    } else {
        return repl::run(&mut session, &printer);
    }

    repl::warn_pending(&session);
    Ok(())
}
