//! Global configuration model for the Corral runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the Corral runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorralConfig {
    /// Base directory for Corral state and data.
    pub data_dir: PathBuf,
    /// Directory holding one sub-directory of instance records per user.
    pub instance_dir: PathBuf,
    /// Grace period before escalating to SIGKILL, in seconds.
    pub stop_timeout_secs: u64,
    /// Registry poll interval while waiting for an instance to exit.
    pub poll_interval_ms: u64,
    /// How long to wait for an instance to disappear after SIGKILL.
    pub kill_confirm_ms: u64,
}

impl CorralConfig {
    /// Builds a configuration rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            instance_dir: data_dir.join("instances"),
            data_dir,
            ..Self::default()
        }
    }

    /// Grace period as a [`Duration`].
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Kill confirmation window as a [`Duration`].
    #[must_use]
    pub const fn kill_confirm(&self) -> Duration {
        Duration::from_millis(self.kill_confirm_ms)
    }
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            instance_dir: constants::default_instance_dir(),
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            kill_confirm_ms: constants::DEFAULT_KILL_CONFIRM_MS,
        }
    }
}
