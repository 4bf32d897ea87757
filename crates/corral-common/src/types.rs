//! Domain primitive types used across the Corral workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::WILDCARD;
use crate::error::{CorralError, Result};

/// A named, running container workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name, unique per owner.
    pub name: String,
    /// User owning the instance.
    pub owner: String,
    /// PID of the supervised process.
    pub pid: i32,
    /// ISO-8601 timestamp of the launch.
    pub started_at: String,
}

impl Instance {
    /// Creates an instance record stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>, pid: i32) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            pid,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (pid {})", self.owner, self.name, self.pid)
    }
}

/// Returns whether `name` is the reserved "every instance" wildcard.
#[must_use]
pub fn is_wildcard(name: &str) -> bool {
    name == WILDCARD
}

/// Checks that `name` can be used as a concrete instance name.
///
/// # Errors
///
/// Returns [`CorralError::Config`] for empty names, the wildcard, names
/// containing `/`, or names starting with `.`.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if is_wildcard(name) {
        "name is reserved"
    } else if name.contains('/') {
        "name contains '/'"
    } else if name.starts_with('.') {
        "name starts with '.'"
    } else {
        return Ok(());
    };
    Err(CorralError::Config {
        message: format!("invalid instance name {name:?}: {reason}"),
    })
}

/// Build script phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    /// `%post`: runs inside the staged container filesystem.
    Post,
    /// `%test`: validates the built container.
    Test,
}

impl PhaseName {
    /// Lowercase section name as used in recipes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
