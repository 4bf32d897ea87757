//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Corral data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/corral";

/// Returns the data directory, preferring `$HOME/.corral` and falling
/// back to `/var/lib/corral`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".corral");
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

/// Returns the default instance registry directory.
pub fn default_instance_dir() -> PathBuf {
    data_dir().join("instances")
}

/// Instance name that targets every instance of the acting user.
pub const WILDCARD: &str = "*";

/// Shell used to run build script phases.
pub const SCRIPT_SHELL: &str = "/bin/sh";

/// Flags passed to [`SCRIPT_SHELL`]: run the command string, exit on
/// the first failing command, trace each command.
pub const SCRIPT_SHELL_FLAGS: &str = "-cex";

/// Default grace period before a stopped instance is force-killed.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Interval at which the registry is polled while waiting for an exit.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// How long to keep polling after SIGKILL before giving up.
pub const DEFAULT_KILL_CONFIRM_MS: u64 = 5_000;

/// Exit code of a successful engine run.
pub const ENGINE_EXIT_SUCCESS: i32 = 0;

/// Exit code of an engine run that hit a fatal error.
pub const ENGINE_EXIT_FATAL: i32 = 255;

/// File extension of instance registry records.
pub const INSTANCE_FILE_EXTENSION: &str = "json";
