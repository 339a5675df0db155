//! A tiny interactive command shell with a recursive tree-copy engine and
//! direct child-process control.
//!
//! The shell reads a line, splits it on whitespace, and dispatches to one of
//! a fixed set of built-in operations: directory listing, directory change,
//! working-directory query, recursive copy of a file or directory tree, and
//! spawning, waiting for and signalling child processes. There are no
//! pipelines, redirections, job tables or variable expansion.
//!
//! The main entry point is [`Interpreter`], which dispatches commands by name
//! through a set of pluggable factories. The [`copy`] and [`process`] modules
//! expose the two cores directly: the copy engine with its
//! directory/file/byte accounting, and the pid-based process controller.

mod builtin;
pub mod command;
pub mod copy;
pub mod env;
mod interpreter;
pub mod process;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
