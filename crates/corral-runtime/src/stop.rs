//! Instance termination protocol.
//!
//! Each targeted instance moves through
//! `RUNNING → GRACE_WAIT → TERMINATED`, or, when the grace period runs
//! out, `GRACE_WAIT → GRACE_EXPIRED → FORCE_WAIT → TERMINATED`.
//! Termination is observed through the registry: an instance is gone once
//! its record disappears. The controller never edits records itself.

use std::time::{Duration, Instant};

use corral_common::config::CorralConfig;
use corral_common::constants::{
    DEFAULT_KILL_CONFIRM_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STOP_TIMEOUT_SECS, WILDCARD,
};
use corral_common::error::{CorralError, Result};
use corral_common::types::{Instance, is_wildcard};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::registry::InstanceRegistry;

/// One invocation of the stop command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRequest {
    /// Instance name, or `*` for every instance of the user.
    pub target_name: String,
    /// Owner of the targeted instances.
    pub acting_user: String,
    /// Kill immediately instead of waiting for the grace period.
    pub force: bool,
    /// Signal delivered first.
    pub signal: Signal,
    /// How long to wait before escalating to `SIGKILL`.
    pub grace_period: Duration,
}

impl TerminationRequest {
    /// Creates a graceful `SIGTERM` request with the default grace period.
    #[must_use]
    pub fn new(target_name: impl Into<String>, acting_user: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            acting_user: acting_user.into(),
            force: false,
            signal: Signal::SIGTERM,
            grace_period: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }

    /// Targets every instance of `acting_user`.
    #[must_use]
    pub fn all(acting_user: impl Into<String>) -> Self {
        Self::new(WILDCARD, acting_user)
    }

    /// Skips the grace period when `force` is set.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overrides the first signal.
    #[must_use]
    pub const fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    /// Overrides the grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Timing of the exit polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Registry poll interval.
    pub poll_interval: Duration,
    /// How long to keep polling after `SIGKILL`.
    pub kill_confirm: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            kill_confirm: Duration::from_millis(DEFAULT_KILL_CONFIRM_MS),
        }
    }
}

impl From<&CorralConfig> for StopPolicy {
    fn from(config: &CorralConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            kill_confirm: config.kill_confirm(),
        }
    }
}

/// Delivers signals to an instance's process group.
pub trait ProcessSignaler: Send + Sync {
    /// Sends `signal` to the process group led by `pgid`.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed delivery.
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()>;
}

/// Signals through `killpg(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaler;

impl ProcessSignaler for SystemSignaler {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()> {
        killpg(pgid, signal)
    }
}

/// How an instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period.
    Exited,
    /// Killed after the grace period expired.
    Killed,
    /// `SIGKILL` issued without waiting (`--force`).
    KillIssued,
}

/// An instance the controller finished with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedInstance {
    /// The stopped instance.
    pub instance: Instance,
    /// How it ended.
    pub outcome: StopOutcome,
    /// Time from the first signal to the outcome.
    pub elapsed: Duration,
}

/// Result of a stop batch.
#[derive(Debug, Default)]
pub struct StopReport {
    /// Instances confirmed stopped, or killed under `--force`.
    pub stopped: Vec<StoppedInstance>,
    /// Instances that could not be stopped.
    pub failures: Vec<(Instance, CorralError)>,
}

impl StopReport {
    /// Number of resolved instances.
    #[must_use]
    pub fn total(&self) -> usize {
        self.stopped.len() + self.failures.len()
    }

    /// Returns whether every resolved instance was stopped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds the failures into one [`CorralError::Batch`].
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Batch`] if any instance failed.
    pub fn into_result(self) -> Result<Vec<StoppedInstance>> {
        if self.failures.is_empty() {
            return Ok(self.stopped);
        }
        Err(CorralError::Batch {
            total: self.total(),
            failures: self.failures.iter().map(|(_, e)| e.to_string()).collect(),
        })
    }
}

/// Resolves instances and drives them through the stop protocol.
pub struct TerminationController {
    registry: Box<dyn InstanceRegistry>,
    signaler: Box<dyn ProcessSignaler>,
    policy: StopPolicy,
}

impl TerminationController {
    /// Creates a controller with the default [`StopPolicy`].
    #[must_use]
    pub fn new(registry: Box<dyn InstanceRegistry>, signaler: Box<dyn ProcessSignaler>) -> Self {
        Self {
            registry,
            signaler,
            policy: StopPolicy::default(),
        }
    }

    /// Replaces the polling policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves `target` for `user`.
    ///
    /// The wildcard yields every live instance of the user, possibly none.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if a concrete name has no live
    /// instance, or any registry error.
    pub fn resolve(&self, target: &str, user: &str) -> Result<Vec<Instance>> {
        if is_wildcard(target) {
            return self.registry.list(user);
        }
        self.registry
            .get(user, target)?
            .map(|instance| vec![instance])
            .ok_or_else(|| CorralError::NotFound {
                kind: "instance",
                id: format!("{user}/{target}"),
            })
    }

    /// Stops every instance matched by `request`.
    ///
    /// Instances are processed one after another, each with its own grace
    /// period. Per-instance failures are collected in the report and do
    /// not abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Usage`] for an empty target, and resolution
    /// errors from [`Self::resolve`].
    pub fn stop(&self, request: TerminationRequest) -> Result<StopReport> {
        if request.target_name.trim().is_empty() {
            return Err(CorralError::Usage {
                message: "an instance name or --all is required".into(),
            });
        }

        let instances = self.resolve(&request.target_name, &request.acting_user)?;
        tracing::info!(
            instance = %request.target_name,
            user = %request.acting_user,
            count = instances.len(),
            force = request.force,
            "stopping instances"
        );

        let mut report = StopReport::default();
        for instance in instances {
            let started = Instant::now();
            match self.stop_instance(&instance, &request) {
                Ok(outcome) => {
                    tracing::info!(name = %instance.name, pid = instance.pid, ?outcome, "instance stopped");
                    report.stopped.push(StoppedInstance {
                        instance,
                        outcome,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => {
                    tracing::error!(name = %instance.name, pid = instance.pid, error = %e, "failed to stop instance");
                    report.failures.push((instance, e));
                }
            }
        }
        Ok(report)
    }

    fn stop_instance(&self, instance: &Instance, request: &TerminationRequest) -> Result<StopOutcome> {
        if instance.pid <= 1 {
            return Err(CorralError::Termination {
                name: instance.name.clone(),
                message: format!("refusing to signal pid {}", instance.pid),
            });
        }

        self.deliver(instance, request.signal)
            .map_err(|errno| termination_error(instance, request.signal, errno))?;

        if request.force {
            if request.signal != Signal::SIGKILL {
                self.kill(instance)?;
            }
            return Ok(StopOutcome::KillIssued);
        }

        if self.wait_until_gone(instance, request.grace_period)? {
            return Ok(StopOutcome::Exited);
        }

        tracing::warn!(
            name = %instance.name,
            pid = instance.pid,
            grace = ?request.grace_period,
            "grace period expired, sending SIGKILL"
        );
        self.kill(instance)?;
        if self.wait_until_gone(instance, self.policy.kill_confirm)? {
            return Ok(StopOutcome::Killed);
        }
        Err(CorralError::Termination {
            name: instance.name.clone(),
            message: format!("process {} still running after SIGKILL", instance.pid),
        })
    }

    fn deliver(&self, instance: &Instance, signal: Signal) -> std::result::Result<(), Errno> {
        tracing::debug!(name = %instance.name, pid = instance.pid, signal = signal.as_str(), "sending signal");
        self.signaler.signal_group(Pid::from_raw(instance.pid), signal)
    }

    /// Sends `SIGKILL`. A group that already vanished counts as killed.
    fn kill(&self, instance: &Instance) -> Result<()> {
        match self.deliver(instance, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                tracing::debug!(name = %instance.name, "instance exited before SIGKILL");
                Ok(())
            }
            Err(errno) => Err(termination_error(instance, Signal::SIGKILL, errno)),
        }
    }

    /// Polls the registry until the instance is gone or `timeout` passes.
    fn wait_until_gone(&self, instance: &Instance, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.registry.get(&instance.owner, &instance.name)?;
            if current.is_none_or(|c| c.pid != instance.pid) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(self.policy.poll_interval.min(deadline - now));
        }
    }
}

fn termination_error(instance: &Instance, signal: Signal, errno: Errno) -> CorralError {
    let message = match errno {
        Errno::ESRCH => format!("process group {} no longer exists", instance.pid),
        Errno::EPERM => format!(
            "permission denied sending {} to process group {}",
            signal.as_str(),
            instance.pid
        ),
        other => format!("sending {} failed: {other}", signal.as_str()),
    };
    CorralError::Termination {
        name: instance.name.clone(),
        message,
    }
}

impl std::fmt::Debug for TerminationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationController")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
