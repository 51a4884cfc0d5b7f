//! Process execution inside a container.
//!
//! A launched process is reaped by a dedicated waiter thread, which drains
//! the output copiers, runs the container's exit hook, and only then wakes
//! anyone blocked in [`Process::wait`]. Callers therefore observe the exit
//! hook's effects as soon as `wait` returns.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use hostbox_common::error::{HostboxError, Result};
use hostbox_core::signal::{self, ProcessSignal};

use crate::sync::lock;

/// Exit code reported when the child could not be reaped.
pub const EXIT_UNKNOWN: i32 = -1;

/// What to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable name or path, resolved against `PATH` and the working directory.
    pub path: String,
    /// Arguments passed after the executable.
    pub args: Vec<String>,
    /// Extra environment, applied on top of the backend's own environment.
    pub env: Vec<(String, String)>,
    /// Working directory relative to the container directory.
    pub dir: Option<PathBuf>,
    /// OS user to run as.
    pub user: Option<String>,
    /// Whether this process's exit status marks the container as finished.
    pub record_exit_status: bool,
}

impl ProcessSpec {
    /// Creates a spec for `path` with no arguments.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory, relative to the container directory.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Runs the process as `user`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Marks this as the container's status-bearing process.
    #[must_use]
    pub const fn record_exit_status(mut self) -> Self {
        self.record_exit_status = true;
        self
    }
}

/// Standard stream bindings for a process. Unset streams are connected to
/// the null device.
#[derive(Default)]
pub struct ProcessIo {
    /// Source copied into the process's stdin.
    pub stdin: Option<Box<dyn Read + Send>>,
    /// Sink receiving the process's stdout.
    pub stdout: Option<Box<dyn Write + Send>>,
    /// Sink receiving the process's stderr.
    pub stderr: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Default)]
struct ExitSlot {
    code: Mutex<Option<i32>>,
    exited: Condvar,
}

impl ExitSlot {
    fn publish(&self, code: i32) {
        *lock(&self.code) = Some(code);
        self.exited.notify_all();
    }
}

/// A process launched inside a container.
#[derive(Debug, Clone)]
pub struct Process {
    id: String,
    pid: u32,
    exit: Arc<ExitSlot>,
}

impl Process {
    /// Container-scoped process identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host process id, which is also the process group id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Blocks until the process exits and returns its exit code.
    ///
    /// A process killed by a signal reports `128 + signo`.
    pub fn wait(&self) -> i32 {
        let guard = lock(&self.exit.code);
        let guard = self
            .exit
            .exited
            .wait_while(guard, |code| code.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        (*guard).unwrap_or(EXIT_UNKNOWN)
    }

    /// Waits at most `timeout` for the process to exit.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let guard = lock(&self.exit.code);
        let (guard, _) = self
            .exit
            .exited
            .wait_timeout_while(guard, timeout, |code| code.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Returns the exit code if the process has already exited.
    pub fn try_wait(&self) -> Option<i32> {
        *lock(&self.exit.code)
    }

    /// Sends `signal` to the process group. A no-op once the process exited.
    ///
    /// # Errors
    ///
    /// Returns [`HostboxError::Signal`] if the kernel refuses the signal.
    pub fn signal(&self, signal: ProcessSignal) -> Result<()> {
        if self.try_wait().is_some() {
            return Ok(());
        }
        let delivered = signal::signal_group(self.pid, signal)?;
        tracing::debug!(id = %self.id, pid = self.pid, ?signal, delivered, "signalled process");
        Ok(())
    }
}

#[cfg(test)]
impl Process {
    /// A handle no OS process backs; it never exits.
    pub(crate) fn detached(id: &str, pid: u32) -> Self {
        Self {
            id: id.to_string(),
            pid,
            exit: Arc::new(ExitSlot::default()),
        }
    }
}

/// Starts `command` with `io` bound to its standard streams.
///
/// `on_exit` runs on the waiter thread with the exit code before any
/// [`Process::wait`] caller is released.
pub(crate) fn spawn<F>(
    id: String,
    mut command: Command,
    path: &str,
    io: ProcessIo,
    on_exit: F,
) -> Result<Process>
where
    F: FnOnce(i32) + Send + 'static,
{
    let ProcessIo {
        stdin,
        stdout,
        stderr,
    } = io;

    let _ = command
        .stdin(piped_if(stdin.is_some()))
        .stdout(piped_if(stdout.is_some()))
        .stderr(piped_if(stderr.is_some()));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let _ = command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| HostboxError::Launch {
        path: path.to_string(),
        source: e,
    })?;
    let pid = child.id();
    tracing::info!(id = %id, pid, path, "process started");

    if let (Some(source), Some(mut sink)) = (stdin, child.stdin.take()) {
        // Detached: the source may block forever after the process exits.
        drop(std::thread::spawn(move || {
            let mut source = source;
            if let Err(e) = io::copy(&mut source, &mut sink) {
                tracing::debug!(pid, error = %e, "stdin copy stopped");
            }
        }));
    }

    let mut pumps = Vec::new();
    if let (Some(out), Some(sink)) = (child.stdout.take(), stdout) {
        pumps.push(pump(out, sink));
    }
    if let (Some(err), Some(sink)) = (child.stderr.take(), stderr) {
        pumps.push(pump(err, sink));
    }

    let exit = Arc::new(ExitSlot::default());
    let waiter_exit = Arc::clone(&exit);
    let waiter_id = id.clone();
    drop(std::thread::spawn(move || {
        let code = reap(&mut child);
        for pump in pumps {
            let _ = pump.join();
        }
        tracing::info!(id = %waiter_id, pid, code, "process exited");
        on_exit(code);
        waiter_exit.publish(code);
    }));

    Ok(Process { id, pid, exit })
}

fn piped_if(bound: bool) -> Stdio {
    if bound { Stdio::piped() } else { Stdio::null() }
}

fn pump<R>(mut from: R, mut to: Box<dyn Write + Send>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        if let Err(e) = io::copy(&mut from, &mut to).and_then(|_| to.flush()) {
            tracing::debug!(error = %e, "output copy stopped");
        }
    })
}

fn reap(child: &mut Child) -> i32 {
    match child.wait() {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "failed to reap process");
            EXIT_UNKNOWN
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return 128 + signo;
        }
    }
    EXIT_UNKNOWN
}
