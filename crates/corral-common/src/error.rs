//! Unified error types for the Corral workspace.
//!
//! Supervisor-side failures (`Launch`, `PhaseFailed`) are fatal for the
//! engine process and are carried to the host inside an engine outcome.
//! Controller-side failures are returned to the operator-facing layer.

use std::path::PathBuf;
use std::process::ExitStatus;

use nix::errno::Errno;
use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Operator input is missing or ambiguous.
    #[error("usage: {message}")]
    Usage {
        /// What the operator has to provide.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A permission or privilege error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A script phase process could not be started.
    #[error("failed to start %{phase} proc: {source}")]
    Launch {
        /// Name of the script phase.
        phase: &'static str,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// A script phase exited unsuccessfully.
    #[error("{phase} proc: {status}")]
    PhaseFailed {
        /// Name of the script phase.
        phase: &'static str,
        /// Exit status reported by the shell.
        status: ExitStatus,
    },

    /// The non-blocking wait on a monitored child failed.
    #[error("error while waiting child {pid}: {source}")]
    Reap {
        /// Monitored process identifier.
        pid: i32,
        /// Errno returned by `waitpid(2)`.
        source: Errno,
    },

    /// Waiting for the next incoming signal failed.
    #[error("error while waiting for signals: {source}")]
    SignalWait {
        /// Errno returned by `sigwait(3)`.
        source: Errno,
    },

    /// The signal source ended before the monitored child exited.
    #[error("signal source closed while waiting for child {pid}")]
    SignalSourceClosed {
        /// Monitored process identifier.
        pid: i32,
    },

    /// A signal other than child termination arrived while monitoring.
    #[error("interrupted by signal {signal}")]
    Interrupted {
        /// Name of the received signal.
        signal: String,
    },

    /// An instance could not be signaled or did not terminate.
    #[error("instance {name}: {message}")]
    Termination {
        /// Instance name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// One or more instances of a stop batch failed.
    #[error("{} of {total} instance(s) failed to stop", .failures.len())]
    Batch {
        /// Number of resolved instances in the batch.
        total: usize,
        /// One diagnostic per failed instance.
        failures: Vec<String>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
