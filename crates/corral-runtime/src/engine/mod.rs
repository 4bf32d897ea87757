//! Engine lifecycle contract and the build engine.
//!
//! An engine launches and supervises the primary process of one workload
//! category. The host drives every engine through the same four
//! operations: [`EngineOperations::start_process`] inside the container,
//! [`EngineOperations::post_start_process`] after launch,
//! [`EngineOperations::monitor_container`] while it runs and
//! [`EngineOperations::cleanup_container`] after it exits.

pub mod build;
pub mod monitor;
pub mod script;

use std::os::unix::net::UnixStream;

use corral_common::constants::{ENGINE_EXIT_FATAL, ENGINE_EXIT_SUCCESS};
use corral_common::error::{CorralError, Result};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Terminal result of [`EngineOperations::start_process`].
///
/// The engine never exits the process itself; the host turns the outcome
/// into an exit code.
#[derive(Debug)]
pub enum EngineOutcome {
    /// Every step completed.
    Success,
    /// A step failed and the engine must end without proceeding.
    Fatal(CorralError),
}

impl EngineOutcome {
    /// Process exit code the host should end with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Success => ENGINE_EXIT_SUCCESS,
            Self::Fatal(_) => ENGINE_EXIT_FATAL,
        }
    }

    /// Returns whether the engine completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Lifecycle operations implemented by each engine variant.
///
/// The post-start and cleanup hooks default to no-ops so that a variant
/// only overrides what it needs.
pub trait EngineOperations {
    /// Runs the engine's work inside the container context.
    ///
    /// `master` is the connection to the controlling process. Its
    /// presence signals readiness.
    fn start_process(&mut self, master: &UnixStream) -> EngineOutcome;

    /// Blocks until `pid`, a direct child, exits.
    ///
    /// # Errors
    ///
    /// Returns an error if reaping fails or another signal interrupts the
    /// wait.
    fn monitor_container(&mut self, pid: Pid) -> Result<WaitStatus>;

    /// Releases resources after the container exited.
    ///
    /// # Errors
    ///
    /// The default implementation never fails.
    fn cleanup_container(&mut self) -> Result<()> {
        Ok(())
    }

    /// Bookkeeping after the container process was launched.
    ///
    /// # Errors
    ///
    /// The default implementation never fails.
    fn post_start_process(&mut self, _pid: Pid) -> Result<()> {
        Ok(())
    }
}
