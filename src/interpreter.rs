use crate::command::{CommandFactory, ExitCode};
use crate::env::Environment;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate — the `BuiltinCommand` set.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// A minimal interactive shell that dispatches to a fixed set of builtins.
///
/// The interpreter maintains an [`Environment`] and a list of
/// [`CommandFactory`] objects that are queried to create commands by name.
/// See [`Default`] for the builtins included out of the box.
///
/// Example
/// ```
/// use myshell::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run("pwd", &[]).unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            commands,
        }
    }

    /// Run a single command invocation by name with arguments.
    ///
    /// Returns the command's exit code, or an error if no factory recognizes
    /// the name.
    pub fn run(&mut self, name: &str, args: &[&str]) -> anyhow::Result<ExitCode> {
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(&self.env, name, args) {
                return cmd.execute(
                    &mut std::io::stdout(),
                    &mut std::io::stderr(),
                    &mut self.env,
                );
            }
        }
        Err(anyhow::anyhow!("unknown command: {}", name))
    }

    /// The interactive Read-Eval-Print Loop.
    ///
    /// Reads a line, splits it on whitespace, and dispatches to [`run`].
    /// Blank lines are skipped; EOF or an interrupt ends the session, as does
    /// the `exit`/`quit` builtin.
    ///
    /// [`run`]: Interpreter::run
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.env.should_exit {
            match rl.readline("\x1b[0;32mmyshell>\x1b[0m ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line)?;

                    let mut words = line.split_whitespace();
                    let Some(name) = words.next() else { continue };
                    let args: Vec<&str> = words.collect();

                    if let Err(err) = self.run(name, &args) {
                        eprintln!("myshell: {err:#}");
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("myshell: {err}");
                    break;
                }
            }
        }

        Ok(())
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the full set of builtins:
    /// `list`, `chdir`, `pwd`, `copy`, `start`, `wait`, `waitfor`, `run`,
    /// `kill`, `exit` and `quit`.
    fn default() -> Self {
        use crate::builtin::*;
        Self::new(vec![
            Box::new(Factory::<List>::default()),
            Box::new(Factory::<Chdir>::default()),
            Box::new(Factory::<Pwd>::default()),
            Box::new(Factory::<Copy>::default()),
            Box::new(Factory::<Start>::default()),
            Box::new(Factory::<Wait>::default()),
            Box::new(Factory::<WaitFor>::default()),
            Box::new(Factory::<Run>::default()),
            Box::new(Factory::<Kill>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Quit>::default()),
        ])
    }
}
