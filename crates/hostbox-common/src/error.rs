//! Unified error types for the hostbox workspace.
//!
//! Every failure is surfaced to the caller as one of these kinds; nothing in
//! the workspace retries internally. Callers that orchestrate several backends
//! use [`HostboxError::is_admission_denied`] to tell a saturated backend apart
//! from a broken one.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HostboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The backend already holds its maximum number of active containers.
    #[error("worker already has the maximum number of active containers ({active}/{max})")]
    AdmissionDenied {
        /// Active containers counted at admission time.
        active: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// A container with the requested handle already exists.
    #[error("handle already exists: {handle}")]
    HandleTaken {
        /// The conflicting handle.
        handle: String,
    },

    /// A caller-supplied handle cannot be used as a directory name.
    #[error("invalid container handle: {handle:?}")]
    InvalidHandle {
        /// The rejected handle.
        handle: String,
    },

    /// A path escapes or otherwise does not fit inside a container directory.
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// The OS user requested for a process could not be resolved.
    #[error("user not found: {user}")]
    UserNotFound {
        /// Requested user name.
        user: String,
    },

    /// A process could not be started.
    #[error("failed to launch {path}: {source}")]
    Launch {
        /// Executable that was requested.
        path: String,
        /// Underlying launch error.
        source: std::io::Error,
    },

    /// Delivering a signal to a process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The operation has no implementation on this platform.
    #[error("{operation} is not supported on this platform")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// Backend shutdown could not destroy every container.
    #[error("failed to destroy {} container(s): {}", .failures.len(), summarize(.failures))]
    Shutdown {
        /// Handle and error for every container that failed to be destroyed.
        failures: Vec<(String, HostboxError)>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HostboxError {
    /// Returns `true` when the backend refused a container for lack of capacity.
    #[must_use]
    pub const fn is_admission_denied(&self) -> bool {
        matches!(self, Self::AdmissionDenied { .. })
    }

    /// Returns `true` for lookups of unknown resources.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Builds an [`HostboxError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn summarize(failures: &[(String, HostboxError)]) -> String {
    failures
        .iter()
        .map(|(handle, err)| format!("{handle}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HostboxError>;
