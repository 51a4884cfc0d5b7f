//! OS identity switching for container processes.
//!
//! A process spec may name a user to run as. The switcher resolves that
//! user, hands the container's directory tree over to it, configures the
//! child's credentials, and rewrites the identity-related environment
//! variables so tools inside the process see a consistent user.
//!
//! The variant is chosen at compile time: [`PosixSwitcher`] on unix hosts and
//! [`UnsupportedSwitcher`] everywhere else.

#[cfg(unix)]
mod posix;
mod unsupported;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use hostbox_common::error::Result;

#[cfg(unix)]
pub use posix::{PosixSwitcher, chown_recursive};
pub use unsupported::UnsupportedSwitcher;

/// Environment variables replaced when switching identity.
pub const IDENTITY_ENV_VARS: [&str; 3] = ["USER", "USERNAME", "HOME"];

/// A resolved OS user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Login name.
    pub username: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
}

/// Capability for running a process under another OS user.
pub trait IdentitySwitcher: Send + Sync + fmt::Debug {
    /// Resolves a user name to its numeric ids and home directory.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the user does not exist, or `Unsupported`
    /// on platforms without POSIX credentials.
    fn resolve(&self, user: &str) -> Result<Identity>;

    /// Re-owns `tree`, sets the credentials of `command`, and rewrites `env`.
    ///
    /// Ownership changes are not rolled back if a later step fails.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any entry of `tree` cannot be re-owned.
    fn apply(
        &self,
        identity: &Identity,
        tree: &Path,
        command: &mut Command,
        env: &mut Vec<(OsString, OsString)>,
    ) -> Result<()>;

    /// Resolves `user` and applies it in one step.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::resolve`] and [`Self::apply`].
    fn switch_user(
        &self,
        user: &str,
        tree: &Path,
        command: &mut Command,
        env: &mut Vec<(OsString, OsString)>,
    ) -> Result<Identity> {
        let identity = self.resolve(user)?;
        self.apply(&identity, tree, command, env)?;
        tracing::debug!(
            user = %identity.username,
            uid = identity.uid,
            gid = identity.gid,
            tree = %tree.display(),
            "switched process identity"
        );
        Ok(identity)
    }
}

/// Drops every `USER`, `USERNAME` and `HOME` entry from `env` and appends
/// fresh values for `identity`. Other entries keep their order, including
/// ones that are not valid UTF-8.
#[must_use]
pub fn rewrite_env(
    env: Vec<(OsString, OsString)>,
    identity: &Identity,
) -> Vec<(OsString, OsString)> {
    let mut rewritten: Vec<(OsString, OsString)> = env
        .into_iter()
        .filter(|(key, _)| !IDENTITY_ENV_VARS.iter().any(|var| key.as_os_str() == *var))
        .collect();
    rewritten.push(("USER".into(), identity.username.clone().into()));
    rewritten.push(("USERNAME".into(), identity.username.clone().into()));
    rewritten.push(("HOME".into(), identity.home.clone().into_os_string()));
    rewritten
}

/// Returns the identity switcher for the current platform.
#[must_use]
pub fn host_switcher() -> Arc<dyn IdentitySwitcher> {
    #[cfg(unix)]
    {
        Arc::new(PosixSwitcher)
    }
    #[cfg(not(unix))]
    {
        Arc::new(UnsupportedSwitcher)
    }
}
