//! Container runtime: one host directory plus the processes started in it.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use hostbox_common::constants::EXIT_STATUS_PROPERTY;
use hostbox_common::error::{HostboxError, Result};
use hostbox_common::types::{ContainerState, Handle, Properties};
use hostbox_core::identity::IdentitySwitcher;
use hostbox_core::paths::confine;
use hostbox_core::signal::ProcessSignal;
use serde::Serialize;

use crate::process::{self, Process, ProcessIo, ProcessSpec};
use crate::stream::{self, ArchiveStream};
use crate::sync::{lock, read, write};

/// Parameters for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Requested handle; generated by the backend when absent.
    pub handle: Option<String>,
    /// Initial properties.
    pub properties: Properties,
    /// Grace time; the backend default applies when absent.
    pub grace_time: Option<Duration>,
}

/// Point-in-time description of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    /// Container handle.
    pub handle: Handle,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Host directory backing the container.
    pub work_dir: PathBuf,
    /// Copy of the property map.
    pub properties: Properties,
    /// Identifiers of every process started in the container.
    pub process_ids: Vec<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// State shared with process exit hooks.
#[derive(Debug)]
struct Status {
    state: RwLock<ContainerState>,
    properties: RwLock<Properties>,
}

impl Status {
    fn record_exit(&self, code: i32) {
        {
            let mut state = write(&self.state);
            if *state != ContainerState::Destroyed {
                *state = ContainerState::Exited(code);
            }
        }
        let _ = write(&self.properties).insert(EXIT_STATUS_PROPERTY.to_string(), code.to_string());
    }
}

/// Processes launched in a container.
///
/// Once `closed` is set no further process is registered, so a teardown
/// that closes the table sees every process that will ever run.
#[derive(Debug, Default)]
struct ProcessTable {
    entries: HashMap<String, Process>,
    closed: bool,
}

/// A container hosted directly on this machine.
///
/// All mutation goes through `&self`; the backend hands out `Arc<Container>`
/// and keeps sole control over when the container is torn down.
#[derive(Debug)]
pub struct Container {
    handle: Handle,
    work_dir: PathBuf,
    created_at: String,
    status: Arc<Status>,
    grace_time: RwLock<Duration>,
    processes: Mutex<ProcessTable>,
    next_process: AtomicU64,
    stop_timeout: Duration,
    switcher: Arc<dyn IdentitySwitcher>,
}

impl Container {
    pub(crate) fn new(
        handle: Handle,
        work_dir: PathBuf,
        spec_properties: Properties,
        grace_time: Duration,
        stop_timeout: Duration,
        switcher: Arc<dyn IdentitySwitcher>,
    ) -> Self {
        Self {
            handle,
            work_dir,
            created_at: chrono::Utc::now().to_rfc3339(),
            status: Arc::new(Status {
                state: RwLock::new(ContainerState::Running),
                properties: RwLock::new(spec_properties),
            }),
            grace_time: RwLock::new(grace_time),
            processes: Mutex::new(ProcessTable::default()),
            next_process: AtomicU64::new(0),
            stop_timeout,
            switcher,
        }
    }

    /// Returns the container's handle.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns the host directory backing the container.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ContainerState {
        *read(&self.status.state)
    }

    /// Whether the container counts against the backend's capacity.
    ///
    /// An exit status written directly into the reserved property also
    /// retires the container.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
            && !read(&self.status.properties).contains_key(EXIT_STATUS_PROPERTY)
    }

    /// Launches a process in the container.
    ///
    /// Registration is serialized with teardown: once the backend has begun
    /// destroying the container, `run` fails instead of starting a process
    /// the teardown would miss.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container was destroyed, `InvalidPath` for a
    /// working directory outside the container, `Launch` if the executable
    /// cannot be resolved or started, and any error from the identity switch.
    pub fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Process> {
        if self.is_closed() {
            return Err(self.gone());
        }

        let dir = match &spec.dir {
            Some(dir) => confine(&self.work_dir, dir)?,
            None => self.work_dir.clone(),
        };

        let mut env = merge_env(std::env::vars_os(), &spec.env);
        let executable = resolve_executable(&spec.path, &env, &dir)?;
        let mut command = Command::new(&executable);
        let _ = command.args(&spec.args).current_dir(&dir);

        if let Some(user) = &spec.user {
            let _ = self
                .switcher
                .switch_user(user, &self.work_dir, &mut command, &mut env)?;
        }
        let _ = command.env_clear().envs(env);

        let mut table = lock(&self.processes);
        if table.closed || self.state() == ContainerState::Destroyed {
            return Err(self.gone());
        }

        let id = (self.next_process.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let status = spec.record_exit_status.then(|| Arc::clone(&self.status));
        let handle = self.handle.clone();
        let process = process::spawn(id.clone(), command, &spec.path, io, move |code| {
            if let Some(status) = status {
                status.record_exit(code);
                tracing::info!(handle = %handle, code, "recorded container exit status");
            }
        })?;

        let _ = table.entries.insert(id, process.clone());
        Ok(process)
    }

    /// Returns a process previously started in this container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown process id.
    pub fn lookup_process(&self, id: &str) -> Result<Process> {
        lock(&self.processes)
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| HostboxError::NotFound {
                kind: "process",
                id: id.to_string(),
            })
    }

    /// Returns every process started in this container.
    ///
    /// Exited processes are retained, so their exit codes stay observable,
    /// until [`forget_exited`](Self::forget_exited) drops them.
    pub fn processes(&self) -> Vec<Process> {
        lock(&self.processes).entries.values().cloned().collect()
    }

    /// Drops every process that has already exited from the table and
    /// returns how many were removed. Running processes are kept.
    pub fn forget_exited(&self) -> usize {
        let mut table = lock(&self.processes);
        let before = table.entries.len();
        table.entries.retain(|_, process| process.try_wait().is_none());
        before - table.entries.len()
    }

    /// Streams the subtree at `path` (relative to the container) as a tar archive.
    ///
    /// `.` or a path ending in `/` archives the directory's contents;
    /// anything else archives the named entry itself.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths leaving the container and an I/O error
    /// if the source does not exist.
    pub fn stream_out(&self, path: &str) -> Result<ArchiveStream> {
        let source = confine(&self.work_dir, Path::new(path))?;
        let contents_only = path.ends_with('/') || source == self.work_dir;
        tracing::debug!(handle = %self.handle, path, "streaming out");
        stream::archive(source, contents_only)
    }

    /// Extracts a tar stream under `path` (relative to the container),
    /// creating intermediate directories and overwriting existing files.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths leaving the container and an I/O error
    /// if extraction fails.
    pub fn stream_in<R: Read>(&self, path: &str, archive: R) -> Result<()> {
        let dest = confine(&self.work_dir, Path::new(path))?;
        tracing::debug!(handle = %self.handle, path, "streaming in");
        stream::extract(archive, &dest)
    }

    /// Returns a single property.
    pub fn property(&self, key: &str) -> Option<String> {
        read(&self.status.properties).get(key).cloned()
    }

    /// Returns a copy of all properties.
    pub fn properties(&self) -> Properties {
        read(&self.status.properties).clone()
    }

    /// Sets a property, replacing any previous value.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        let _ = write(&self.status.properties).insert(key.into(), value.into());
    }

    /// Removes a property.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the property is not set.
    pub fn remove_property(&self, key: &str) -> Result<()> {
        write(&self.status.properties)
            .remove(key)
            .map(drop)
            .ok_or_else(|| HostboxError::NotFound {
                kind: "property",
                id: key.to_string(),
            })
    }

    /// Returns the grace time.
    pub fn current_grace_time(&self) -> Duration {
        *read(&self.grace_time)
    }

    /// Replaces the grace time.
    pub fn set_grace_time(&self, grace_time: Duration) {
        *write(&self.grace_time) = grace_time;
    }

    /// Stops every process and waits for all of them to exit.
    ///
    /// Without `kill`, processes get SIGTERM and the configured stop timeout
    /// before SIGKILL. With `kill`, SIGKILL is sent immediately. Processes
    /// that already exited are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first `Signal` error. Every other process is still
    /// signalled and waited for; a process whose signals all failed is not
    /// waited for.
    pub fn stop(&self, kill: bool) -> Result<()> {
        let processes = self.live_processes();
        self.stop_processes(&processes, kill)
    }

    /// Closes the process table and kills everything in it.
    ///
    /// After this returns no process of the container is running, and any
    /// later [`run`](Self::run) fails with `NotFound`.
    pub(crate) fn shut_down(&self) -> Result<()> {
        let processes = {
            let mut table = lock(&self.processes);
            table.closed = true;
            live(&table)
        };
        self.stop_processes(&processes, true)
    }

    fn live_processes(&self) -> Vec<Process> {
        live(&lock(&self.processes))
    }

    fn stop_processes(&self, processes: &[Process], kill: bool) -> Result<()> {
        let first = if kill {
            ProcessSignal::Kill
        } else {
            ProcessSignal::Terminate
        };

        let mut failures = Vec::new();
        let mut reachable: Vec<bool> = processes
            .iter()
            .map(|process| self.deliver(process, first, &mut failures))
            .collect();

        if !kill {
            let deadline = Instant::now() + self.stop_timeout;
            for (process, reachable) in processes.iter().zip(&mut reachable) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if process.wait_timeout(remaining).is_none() {
                    tracing::warn!(
                        handle = %self.handle,
                        pid = process.pid(),
                        "process ignored SIGTERM, killing"
                    );
                    *reachable = self.deliver(process, ProcessSignal::Kill, &mut failures);
                }
            }
        }

        // A process no signal reached may never exit.
        for (process, reachable) in processes.iter().zip(&reachable) {
            if *reachable {
                let _ = process.wait();
            }
        }
        tracing::info!(handle = %self.handle, kill, count = processes.len(), "container stopped");
        failures.into_iter().next().map_or(Ok(()), Err)
    }

    fn deliver(
        &self,
        process: &Process,
        signal: ProcessSignal,
        failures: &mut Vec<HostboxError>,
    ) -> bool {
        match process.signal(signal) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    handle = %self.handle,
                    pid = process.pid(),
                    ?signal,
                    error = %e,
                    "failed to signal process"
                );
                failures.push(e);
                false
            }
        }
    }

    /// Returns a snapshot of the container.
    pub fn info(&self) -> ContainerInfo {
        let mut process_ids: Vec<String> =
            lock(&self.processes).entries.keys().cloned().collect();
        process_ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        ContainerInfo {
            handle: self.handle.clone(),
            state: self.state(),
            work_dir: self.work_dir.clone(),
            properties: self.properties(),
            process_ids,
            created_at: self.created_at.clone(),
        }
    }

    pub(crate) fn mark_destroyed(&self) {
        *write(&self.status.state) = ContainerState::Destroyed;
    }

    fn is_closed(&self) -> bool {
        self.state() == ContainerState::Destroyed || lock(&self.processes).closed
    }

    fn gone(&self) -> HostboxError {
        HostboxError::NotFound {
            kind: "container",
            id: self.handle.to_string(),
        }
    }
}

fn live(table: &ProcessTable) -> Vec<Process> {
    table
        .entries
        .values()
        .filter(|process| process.try_wait().is_none())
        .cloned()
        .collect()
}

/// Builds a child environment: `parent` first, then `extra`, so later
/// entries win. Entries that are not valid UTF-8 pass through untouched.
fn merge_env<I>(parent: I, extra: &[(String, String)]) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: Vec<(OsString, OsString)> = parent.into_iter().collect();
    env.extend(
        extra
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value))),
    );
    env
}

fn resolve_executable(path: &str, env: &[(OsString, OsString)], cwd: &Path) -> Result<PathBuf> {
    let search_path = env
        .iter()
        .rev()
        .find(|(key, _)| key.as_os_str() == "PATH")
        .map(|(_, value)| value.clone());
    which::which_in(path, search_path, cwd).map_err(|e| HostboxError::Launch {
        path: path.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
    })
}
