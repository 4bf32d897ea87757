//! Persistent instance registry.
//!
//! Each running instance is recorded as one JSON file under
//! `<instance_dir>/<owner>/<name>.json`, which keeps lookups daemon-less.
//! Records whose process no longer exists are pruned when they are read.
//!
//! Instance supervisors write records with [`FileRegistry::register`] when
//! an instance starts and remove them with [`FileRegistry::unregister`]
//! once it is reaped. The stop controller only reads.

use std::path::{Path, PathBuf};

use corral_common::config::CorralConfig;
use corral_common::constants::INSTANCE_FILE_EXTENSION;
use corral_common::error::{CorralError, Result};
use corral_common::types::{Instance, validate_instance_name};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Lookup and enumeration of live instances.
pub trait InstanceRegistry: Send + Sync {
    /// Returns the live instance `name` owned by `owner`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn get(&self, owner: &str, name: &str) -> Result<Option<Instance>>;

    /// Returns every live instance owned by `owner`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn list(&self, owner: &str) -> Result<Vec<Instance>>;
}

/// Registry backed by one JSON record per instance.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    /// Creates a registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a registry at the configured instance directory.
    #[must_use]
    pub fn from_config(config: &CorralConfig) -> Self {
        Self::new(config.instance_dir.clone())
    }

    /// Records a newly launched instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, a live instance with the
    /// same name already exists for the owner, or the record cannot be
    /// written.
    pub fn register(&self, instance: &Instance) -> Result<()> {
        validate_instance_name(&instance.name)?;
        if self.get(&instance.owner, &instance.name)?.is_some() {
            return Err(CorralError::Config {
                message: format!(
                    "instance {} already running for user {}",
                    instance.name, instance.owner
                ),
            });
        }

        let path = self.record_path(&instance.owner, &instance.name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CorralError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let tmp = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(instance)?;
        std::fs::write(&tmp, content).map_err(|e| CorralError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CorralError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::info!(owner = %instance.owner, name = %instance.name, pid = instance.pid, "instance registered");
        Ok(())
    }

    /// Removes an instance record. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    pub fn unregister(&self, owner: &str, name: &str) -> Result<bool> {
        let path = self.record_path(owner, name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(owner, name, "instance unregistered");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }

    fn user_dir(&self, owner: &str) -> Result<PathBuf> {
        if owner.is_empty() || owner.contains('/') || owner.starts_with('.') {
            return Err(CorralError::Config {
                message: format!("invalid user name {owner:?}"),
            });
        }
        Ok(self.root.join(owner))
    }

    fn record_path(&self, owner: &str, name: &str) -> Result<PathBuf> {
        validate_instance_name(name)?;
        Ok(self
            .user_dir(owner)?
            .join(format!("{name}.{INSTANCE_FILE_EXTENSION}")))
    }

    /// Loads a record, pruning it if its process is gone.
    fn load_live(path: &Path) -> Result<Option<Instance>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CorralError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let instance: Instance = serde_json::from_str(&content)?;
        if is_alive(instance.pid) {
            return Ok(Some(instance));
        }

        tracing::debug!(path = %path.display(), pid = instance.pid, "pruning stale instance record");
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune stale record");
            }
        }
        Ok(None)
    }
}

impl InstanceRegistry for FileRegistry {
    fn get(&self, owner: &str, name: &str) -> Result<Option<Instance>> {
        let path = self.record_path(owner, name)?;
        Self::load_live(&path)
    }

    fn list(&self, owner: &str) -> Result<Vec<Instance>> {
        let dir = self.user_dir(owner)?;
        tracing::debug!(dir = %dir.display(), "listing instances");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::Io { path: dir, source: e }),
        };

        let mut instances = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CorralError::Io {
                    path: dir.clone(),
                    source: e,
                })?
                .path();
            if path.extension().is_none_or(|ext| ext != INSTANCE_FILE_EXTENSION) {
                continue;
            }
            match Self::load_live(&path) {
                Ok(Some(instance)) => instances.push(instance),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable instance record"),
            }
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }
}

/// Returns whether a process with `pid` exists.
///
/// `EPERM` means the process exists but belongs to someone else.
pub(crate) fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
