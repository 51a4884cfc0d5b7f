//! Identity switcher for platforms without POSIX credentials.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use hostbox_common::error::{HostboxError, Result};

use super::{Identity, IdentitySwitcher};

/// Switcher that refuses every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSwitcher;

impl IdentitySwitcher for UnsupportedSwitcher {
    fn resolve(&self, _user: &str) -> Result<Identity> {
        Err(HostboxError::Unsupported {
            operation: "running processes as another user",
        })
    }

    fn apply(
        &self,
        _identity: &Identity,
        _tree: &Path,
        _command: &mut Command,
        _env: &mut Vec<(OsString, OsString)>,
    ) -> Result<()> {
        Err(HostboxError::Unsupported {
            operation: "running processes as another user",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_user_is_unsupported() {
        let mut command = Command::new("true");
        let mut env = Vec::new();
        let err = UnsupportedSwitcher
            .switch_user("root", Path::new("/tmp"), &mut command, &mut env)
            .unwrap_err();
        assert!(matches!(err, HostboxError::Unsupported { .. }));
        assert!(env.is_empty());
    }
}
