//! Domain primitive types used across the hostbox workspace.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HostboxError, Result};

/// String key/value metadata attached to a container.
pub type Properties = HashMap<String, String>;

/// Unique identifier of a container, also used as its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    /// Wraps a handle produced by the backend's generator.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Validates a caller-supplied handle.
    ///
    /// # Errors
    ///
    /// Returns [`HostboxError::InvalidHandle`] if the handle is empty, is
    /// `.` or `..`, or contains a path separator or NUL byte.
    pub fn parse(handle: impl Into<String>) -> Result<Self> {
        let handle = handle.into();
        let invalid = handle.is_empty()
            || handle == "."
            || handle == ".."
            || handle.contains(['/', '\\', '\0']);
        if invalid {
            return Err(HostboxError::InvalidHandle { handle });
        }
        Ok(Self(handle))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container is registered and has not recorded a terminal exit status.
    Running,
    /// The container's status-bearing process exited with the given code.
    Exited(i32),
    /// Container has been torn down by the backend.
    Destroyed,
}

impl ContainerState {
    /// Whether the state counts against the backend's capacity.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Admission ceiling reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Maximum number of simultaneously active containers.
    pub max_active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_plain_names() {
        let handle = Handle::parse("build-42").unwrap();
        assert_eq!(handle.as_str(), "build-42");
        assert_eq!(handle.to_string(), "build-42");
    }

    #[test]
    fn parse_rejects_path_like_names() {
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            let err = Handle::parse(bad).unwrap_err();
            assert!(matches!(err, HostboxError::InvalidHandle { .. }), "{bad:?}");
        }
    }

    #[test]
    fn only_running_is_active() {
        assert!(ContainerState::Running.is_active());
        assert!(!ContainerState::Exited(0).is_active());
        assert!(!ContainerState::Destroyed.is_active());
    }

    #[test]
    fn state_display() {
        assert_eq!(ContainerState::Exited(3).to_string(), "exited(3)");
        assert_eq!(ContainerState::Destroyed.to_string(), "destroyed");
    }
}
