//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Default base directory for hostbox data when running as root.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/hostbox";

/// Returns the data directory, preferring `$HOME/.hostbox` when it can be
/// created and falling back to [`SYSTEM_DATA_DIR`].
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".hostbox");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default directory holding one subdirectory per container.
pub fn default_containers_dir() -> PathBuf {
    data_dir().join("containers")
}

/// Property key recording the exit status of a container's primary process.
pub const EXIT_STATUS_PROPERTY: &str = "hostbox:exit-status";

/// Default ceiling on simultaneously active containers.
pub const DEFAULT_MAX_ACTIVE_CONTAINERS: usize = 1;

/// Default grace time before an idle container may be reaped.
pub const DEFAULT_GRACE_TIME: Duration = Duration::from_secs(5 * 60);

/// How long a polite stop waits before escalating to SIGKILL.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Width of generated container handles.
pub const HANDLE_LENGTH: usize = 11;

/// Application name used in CLI output.
pub const APP_NAME: &str = "hostbox";
