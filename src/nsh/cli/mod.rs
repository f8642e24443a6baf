//! Binary-only pieces: argument parsing, the line loop and rendering.

pub mod args;
pub mod render;
pub mod repl;
