//! Signal delivery to container process groups.
//!
//! Every container process is started as the leader of its own process
//! group, so signalling the group also reaches anything it forked.

use hostbox_common::error::{HostboxError, Result};

/// Signals the runtime sends to processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSignal {
    /// Polite termination request (SIGTERM).
    Terminate,
    /// Immediate termination (SIGKILL).
    Kill,
}

/// Sends `signal` to the process group led by `pid`.
///
/// Returns `Ok(false)` if the group no longer exists.
///
/// # Errors
///
/// Returns [`HostboxError::Signal`] if the kernel refuses the signal.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: ProcessSignal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| HostboxError::Signal {
        pid,
        source: std::io::Error::from(Errno::EINVAL),
    })?;
    let sig = match signal {
        ProcessSignal::Terminate => Signal::SIGTERM,
        ProcessSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) => {
            tracing::debug!(pid, ?sig, "signalled process group");
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(HostboxError::Signal {
            pid,
            source: e.into(),
        }),
    }
}

/// Stub for non-unix platforms.
///
/// # Errors
///
/// Always returns [`HostboxError::Unsupported`].
#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: ProcessSignal) -> Result<bool> {
    Err(HostboxError::Unsupported {
        operation: "process group signalling",
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::CommandExt;
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    #[test]
    fn kill_terminates_group_leader() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("spawn sleep");

        assert!(signal_group(child.id(), ProcessSignal::Kill).expect("signal"));
        let status = child.wait().expect("wait");
        assert_eq!(status.signal(), Some(9));
    }

    #[test]
    fn reaped_group_reports_gone() {
        let mut child = std::process::Command::new("true")
            .process_group(0)
            .spawn()
            .expect("spawn true");
        let pid = child.id();
        let _ = child.wait().expect("wait");

        assert!(!signal_group(pid, ProcessSignal::Terminate).expect("signal"));
    }
}
