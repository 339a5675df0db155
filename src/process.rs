use anyhow::{Context, Result, bail};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, wait, waitpid};
use nix::unistd::Pid;
use std::fmt;
use std::io;
use std::process::Command;

/// What a blocking wait observed about a child.
///
/// The shell keeps no process handles, only pids; once a pid has been
/// observed here it is reaped and no longer a valid wait or kill target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child exited on its own with the given status code.
    Exited { pid: i32, status: i32 },
    /// The child was terminated by a signal.
    Signaled { pid: i32, signal: Signal },
    /// The kernel reported a state this shell does not track.
    Unknown { pid: i32 },
    /// The shell currently has no children at all.
    NoChildren,
    /// The pid is not a waitable child (already reaped, or never ours).
    NoSuchChild,
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitOutcome::Exited { pid, status } => {
                write!(f, "process {pid} exited normally with status {status}.")
            }
            WaitOutcome::Signaled { pid, signal } => {
                write!(
                    f,
                    "process {pid} exited abnormally with signal {}: {}",
                    *signal as i32,
                    signal.as_str()
                )
            }
            WaitOutcome::Unknown { pid } => write!(f, "process {pid} exited in unknown state"),
            WaitOutcome::NoChildren => write!(f, "no children."),
            WaitOutcome::NoSuchChild => write!(f, "no child with such PID."),
        }
    }
}

fn outcome(status: WaitStatus) -> WaitOutcome {
    match status {
        WaitStatus::Exited(pid, code) => WaitOutcome::Exited {
            pid: pid.as_raw(),
            status: code,
        },
        WaitStatus::Signaled(pid, signal, _core_dumped) => WaitOutcome::Signaled {
            pid: pid.as_raw(),
            signal,
        },
        other => WaitOutcome::Unknown {
            pid: other.pid().map(Pid::as_raw).unwrap_or(-1),
        },
    }
}

/// Launch a child process running an external program.
///
/// `argv[0]` is the invoking builtin's label; the program name and its
/// arguments start at `argv[1]`. The child inherits the shell's standard
/// streams and runs concurrently; the returned pid is the only reference the
/// shell keeps (the `Child` handle is dropped without waiting, reaping
/// happens through [`wait_any`] / [`wait_for`]).
///
/// A program that cannot be loaded (not found, permission denied) is an
/// ordinary reported error. Any other creation failure means the OS could not
/// give us a process at all, which is fatal to the shell.
pub fn spawn(argv: &[String]) -> Result<i32> {
    let Some((label, rest)) = argv.split_first() else {
        bail!("empty argument list");
    };
    let Some((program, args)) = rest.split_first() else {
        bail!("{label} requires at least a program to run");
    };

    match Command::new(program).args(args).spawn() {
        Ok(child) => Ok(child.id() as i32),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            Err(anyhow::Error::new(err).context(format!("unable to execute {program}")))
        }
        Err(err) => {
            eprintln!("myshell: unable to spawn {program}: {err}");
            std::process::exit(1);
        }
    }
}

/// Block until any child of the shell changes state.
///
/// Never blocks forever when there is nothing to wait for: with zero live
/// children this returns [`WaitOutcome::NoChildren`].
pub fn wait_any() -> Result<WaitOutcome> {
    loop {
        match wait() {
            Ok(status) => return Ok(outcome(status)),
            Err(Errno::ECHILD) => return Ok(WaitOutcome::NoChildren),
            Err(Errno::EINTR) => continue,
            Err(err) => bail!("unable to wait for any child: {err}"),
        }
    }
}

/// Block until the child with the given pid changes state.
///
/// A pid that is not a waitable child (already reaped, never existed, or not
/// ours) yields [`WaitOutcome::NoSuchChild`] rather than an error. Non-positive
/// pids are rejected up front; the kernel would treat them as process-group
/// waits.
pub fn wait_for(pid: i32) -> Result<WaitOutcome> {
    if pid <= 0 {
        return Ok(WaitOutcome::NoSuchChild);
    }
    loop {
        match waitpid(Pid::from_raw(pid), None) {
            Ok(status) => return Ok(outcome(status)),
            Err(Errno::ECHILD) => return Ok(WaitOutcome::NoSuchChild),
            Err(Errno::EINTR) => continue,
            Err(err) => bail!("unable to wait for child with PID {pid}: {err}"),
        }
    }
}

/// Send the graceful termination signal (`SIGTERM`, never `SIGKILL`) to the
/// given pid.
///
/// Non-positive pids are rejected; a negative pid would signal a whole
/// process group.
pub fn terminate(pid: i32) -> Result<()> {
    if pid <= 0 {
        bail!("no such process: {pid}");
    }
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("unable to terminate process {pid}"))
}

/// Serializes tests that spawn or reap children: `wait(2)` operates on the
/// whole process and would otherwise steal children across tests.
#[cfg(test)]
pub(crate) fn lock_child_table() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap()
}
