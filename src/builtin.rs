use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::copy::{self, FailurePolicy};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::process::{self, WaitOutcome};
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// directly in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "copy" or "chdir".
    fn name() -> &'static str;

    /// Executes the command using the provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero
    /// for error.
    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdout, stderr, env) {
            Ok(code) => Ok(code),
            Err(err) => {
                writeln!(stderr, "{}: {:#}", T::name(), err)?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            stderr.write_all(self.output.as_bytes())?;
            Ok(1)
        } else {
            stdout.write_all(self.output.as_bytes())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// List the contents of the current working directory.
pub struct List {}

impl BuiltinCommand for List {
    fn name() -> &'static str {
        "list"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let entries = fs::read_dir(&env.current_dir)
            .with_context(|| format!("unable to open directory {}", env.current_dir.display()))?;

        writeln!(stdout, "Type {:>13}\t\t{:>16}", "Filename", "Total Bytes")?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("unable to read directory {}", env.current_dir.display())
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry
                .metadata()
                .with_context(|| format!("unable to stat file {name}"))?;

            // directories in red, executables in green, other files in yellow
            if meta.is_dir() {
                writeln!(
                    stdout,
                    "\x1b[0;31mD: {:>15}\x1b[0m \t\t{:>10} bytes",
                    name,
                    meta.len()
                )?;
            } else if meta.permissions().mode() & 0o100 != 0 {
                writeln!(
                    stdout,
                    "\x1b[0;32mF: {:>15}\x1b[0m \t\t{:>10} bytes",
                    name,
                    meta.len()
                )?;
            } else {
                writeln!(
                    stdout,
                    "\x1b[0;33mF: {:>15}\x1b[0m \t\t{:>10} bytes",
                    name,
                    meta.len()
                )?;
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
pub struct Chdir {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: String,
}

impl BuiltinCommand for Chdir {
    fn name() -> &'static str {
        "chdir"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = PathBuf::from(&self.target);
        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir).with_context(|| {
            format!(
                "unable to change current working directory to {}",
                new_dir.display()
            )
        })?;
        env::set_current_dir(&canonical).with_context(|| {
            format!(
                "unable to change current working directory to {}",
                canonical.display()
            )
        })?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Recursively copy a file or directory tree, preserving permission bits.
pub struct Copy {
    #[argh(positional)]
    /// source file or directory
    pub source: String,

    #[argh(positional)]
    /// destination path; must not already exist for a directory copy
    pub dest: String,
}

impl BuiltinCommand for Copy {
    fn name() -> &'static str {
        "copy"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        copy::copy_tree(
            Path::new(&self.source),
            Path::new(&self.dest),
            FailurePolicy::Report,
            stdout,
        )?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Start a program as a concurrently running child process.
pub struct Start {
    #[argh(positional, greedy)]
    /// program to run followed by its arguments
    pub argv: Vec<String>,
}

impl BuiltinCommand for Start {
    fn name() -> &'static str {
        "start"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.argv.is_empty() {
            bail!("requires at least a program to run");
        }
        let mut argv = vec![Self::name().to_string()];
        argv.extend(self.argv);
        let pid = process::spawn(&argv)?;
        writeln!(stdout, "myshell: process {pid} started")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Wait for any child process to finish.
pub struct Wait {}

impl BuiltinCommand for Wait {
    fn name() -> &'static str {
        "wait"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let outcome = process::wait_any()?;
        writeln!(stdout, "myshell: {outcome}")?;
        Ok(match outcome {
            WaitOutcome::Unknown { .. } => 1,
            _ => 0,
        })
    }
}

#[derive(FromArgs)]
/// Wait for the child process with the given pid to finish.
pub struct WaitFor {
    #[argh(positional)]
    /// pid of the child to wait for
    pub pid: i32,
}

impl BuiltinCommand for WaitFor {
    fn name() -> &'static str {
        "waitfor"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let outcome = process::wait_for(self.pid)?;
        writeln!(stdout, "myshell: {outcome}")?;
        Ok(match outcome {
            WaitOutcome::Unknown { .. } => 1,
            _ => 0,
        })
    }
}

#[derive(FromArgs)]
/// Start a program and wait for it to finish.
pub struct Run {
    #[argh(positional, greedy)]
    /// program to run followed by its arguments
    pub argv: Vec<String>,
}

impl BuiltinCommand for Run {
    fn name() -> &'static str {
        "run"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.argv.is_empty() {
            bail!("requires at least a program to run");
        }
        let mut argv = vec![Self::name().to_string()];
        argv.extend(self.argv);
        let pid = process::spawn(&argv)?;
        writeln!(stdout, "myshell: process {pid} started")?;
        let outcome = process::wait_for(pid)?;
        writeln!(stdout, "myshell: {outcome}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Send SIGTERM to the process with the given pid.
pub struct Kill {
    #[argh(positional)]
    /// pid of the target process
    pub pid: i32,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        process::terminate(self.pid)?;
        writeln!(stdout, "kill: sent SIGTERM to process {}", self.pid)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Quit {}

impl BuiltinCommand for Quit {
    fn name() -> &'static str {
        "quit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}
