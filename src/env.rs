use std::env as stdenv;
use std::path::PathBuf;

/// Mutable, shell-level view of the process state used by the interpreter.
///
/// The environment contains:
/// - `current_dir`: the working directory commands resolve paths against.
/// - `should_exit`: a flag the REPL checks to know when to terminate.
///
/// Note: fields are public for simplicity to keep the crate small.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// When set to true, indicates that the interactive loop should exit.
    pub should_exit: bool,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// Initializes `current_dir` from `std::env::current_dir()`; the
    /// `should_exit` flag starts as `false`.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            current_dir,
            should_exit: false,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
