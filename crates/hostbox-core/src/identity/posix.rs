//! POSIX identity switching via the passwd database and setuid/setgid.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use hostbox_common::error::{HostboxError, Result};
use nix::unistd::{Gid, Uid, User, chown};

use super::{Identity, IdentitySwitcher, rewrite_env};

/// Switcher backed by `getpwnam(3)` and the child's uid/gid.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixSwitcher;

impl IdentitySwitcher for PosixSwitcher {
    fn resolve(&self, user: &str) -> Result<Identity> {
        let entry = User::from_name(user)
            .map_err(|e| {
                tracing::debug!(user, error = %e, "passwd lookup failed");
                HostboxError::UserNotFound {
                    user: user.to_string(),
                }
            })?
            .ok_or_else(|| HostboxError::UserNotFound {
                user: user.to_string(),
            })?;

        Ok(Identity {
            username: entry.name,
            uid: entry.uid.as_raw(),
            gid: entry.gid.as_raw(),
            home: entry.dir,
        })
    }

    fn apply(
        &self,
        identity: &Identity,
        tree: &Path,
        command: &mut Command,
        env: &mut Vec<(OsString, OsString)>,
    ) -> Result<()> {
        chown_recursive(tree, identity.uid, identity.gid)?;
        let _ = command.uid(identity.uid).gid(identity.gid);
        *env = rewrite_env(std::mem::take(env), identity);
        Ok(())
    }
}

/// Changes ownership of `path` and everything below it.
///
/// Symlinks are skipped rather than followed so the walk never leaves the tree.
///
/// # Errors
///
/// Returns an I/O error for the first entry that cannot be read or re-owned.
pub fn chown_recursive(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| HostboxError::io(path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(|e| HostboxError::io(path, e.into()))?;

    if meta.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|e| HostboxError::io(path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| HostboxError::io(path, e))?;
            chown_recursive(&entry.path(), uid, gid)?;
        }
    }
    Ok(())
}
