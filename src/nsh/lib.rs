//! # nsh Architecture
//!
//! nsh is a **namespace shell core**. A command line is parsed into a
//! pipeline, its first stage is resolved against a tree of namespaces, and
//! the remaining stages either narrow the query handed to the data source or
//! transform the materialized result. The binary is one client of this
//! library; tests are another.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI Layer (cli/, wired by main.rs)                         │
//! │  - Arguments, line loop, rendering of Output values         │
//! │  - The ONLY place that knows about stdout/stderr/exit codes │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session Layer (session.rs, parse.rs, pipeline.rs)          │
//! │  - Current path, aliases, variables, last task              │
//! │  - Text → Pipeline AST → folded Query → Output              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Command Layer (dispatch.rs, commands/, namespace/)         │
//! │  - Namespace tree: plain, collection, entity nodes          │
//! │  - Typed property mappings, entity edit/save/delete         │
//! │  - Returns Output values, never prints                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/, remote/, feed.rs, task.rs)          │
//! │  - LoadStrategy / SaveStrategy trait objects                │
//! │  - Transport trait, InMemoryRemote, live entity feeds       │
//! │  - Task table and promises for asynchronous mutations       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: No I/O Assumptions in Core
//!
//! Everything below the CLI layer:
//! - Takes raw strings or typed values as arguments
//! - Returns [`output::Output`] or a typed [`error::NshError`]
//! - **Never** writes to stdout/stderr
//! - **Never** calls `std::process::exit`
//!
//! The only file the core touches is the session variables file, and only
//! when asked to (`saveopt`, `source`, [`session::Session::with_config`]).
//!
//! ## Testing Strategy
//!
//! - **Core**: unit tests next to each module, driven through
//!   `test_utils::Fixture` (the catalogue over a seeded
//!   [`remote::memory::InMemoryRemote`]). Remote traffic is asserted via
//!   the backend's call log.
//! - **Pipelines**: `tests/` run whole command lines through
//!   [`session::Session::eval`].
//! - **Binary**: `tests/` drive the `nsh` executable with `assert_cmd`.
//!
//! ## Module Overview
//!
//! - [`value`]: value types, coercion and formatting
//! - [`property`]: property mappings and requirement groups
//! - [`model`]: entity JSON helpers (dotted paths, merge)
//! - [`query`]: predicates, sort keys, limits and their evaluation
//! - [`namespace`]: the namespace tree
//! - [`commands`]: command and filter traits, builtins, entity commands
//! - [`dispatch`]: stage resolution and command invocation
//! - [`pipeline`]: filter folding and stage execution
//! - [`parse`]: command line tokenizer and pipeline AST
//! - [`session`]: per-shell state
//! - [`config`]: session variables and their file
//! - [`store`]: load and save strategies
//! - [`remote`]: transport trait, connection, in-memory backend
//! - [`feed`]: live entity collections pushed by the backend
//! - [`task`]: task table, status updates and promises
//! - [`output`]: command results
//! - [`catalog`]: the namespace tree shipped with the binary
//! - [`error`]: error types
//! - `cli`: arguments, line loop and rendering for the binary (not part of the lib API)

pub mod catalog;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod model;
pub mod namespace;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod property;
pub mod query;
pub mod remote;
pub mod session;
pub mod store;
pub mod task;
pub mod value;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
