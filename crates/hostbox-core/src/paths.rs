//! Confinement of caller-supplied paths to a container directory.

use std::path::{Component, Path, PathBuf};

use hostbox_common::error::{HostboxError, Result};

/// Joins `relative` onto `root`, refusing to leave `root`.
///
/// Absolute paths are re-rooted under `root` and `.` components are dropped.
/// Any `..` component is rejected outright instead of being resolved, so the
/// result never depends on what is currently on disk.
///
/// # Errors
///
/// Returns [`HostboxError::InvalidPath`] if `relative` contains `..`.
pub fn confine(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut confined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(HostboxError::InvalidPath {
                    path: relative.to_path_buf(),
                    reason: "parent directory components are not allowed",
                });
            }
        }
    }
    Ok(confined)
}
