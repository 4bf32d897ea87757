//! Blocking supervision of a container's primary process.

use corral_common::error::{CorralError, Result};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Collects the exit status of a direct child without blocking.
pub trait ChildReaper: Send {
    /// Attempts to reap `pid`.
    ///
    /// Returns [`WaitStatus::StillAlive`] when the child has not exited.
    ///
    /// # Errors
    ///
    /// Returns the errno reported by the wait call.
    fn try_reap(&mut self, pid: Pid) -> nix::Result<WaitStatus>;
}

/// Reaps through `waitpid(pid, WNOHANG)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReaper;

impl ChildReaper for SystemReaper {
    fn try_reap(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
        waitpid(pid, Some(WaitPidFlag::WNOHANG))
    }
}

/// Blocks until `pid` exits and returns its wait status.
///
/// `pid` is reaped once before the first signal is awaited, since a child
/// that exited before the signal source was subscribed has already had its
/// `SIGCHLD` discarded. After that each `SIGCHLD` triggers one non-blocking
/// reap of exactly `pid`. A reap that yields another pid, or nothing, means
/// a sibling exited and the loop keeps waiting. Any other signal ends the
/// wait.
///
/// # Errors
///
/// - [`CorralError::Reap`] if the wait call fails.
/// - [`CorralError::Interrupted`] if a signal other than `SIGCHLD` arrives.
/// - [`CorralError::SignalWait`] if receiving the next signal fails.
/// - [`CorralError::SignalSourceClosed`] if the stream ends.
pub fn monitor_child(
    pid: Pid,
    signals: &mut dyn Iterator<Item = Result<Signal>>,
    reaper: &mut dyn ChildReaper,
) -> Result<WaitStatus> {
    tracing::debug!(pid = pid.as_raw(), "monitoring container process");

    if let Some(status) = reap_exited(pid, reaper)? {
        tracing::info!(pid = pid.as_raw(), ?status, "container process already exited");
        return Ok(status);
    }

    for received in signals {
        match received? {
            Signal::SIGCHLD => {
                let Some(status) = reap_exited(pid, reaper)? else {
                    tracing::trace!(pid = pid.as_raw(), "SIGCHLD for another child");
                    continue;
                };
                tracing::info!(pid = pid.as_raw(), ?status, "container process exited");
                return Ok(status);
            }
            other => {
                tracing::warn!(pid = pid.as_raw(), signal = other.as_str(), "monitoring interrupted");
                return Err(CorralError::Interrupted {
                    signal: other.as_str().to_owned(),
                });
            }
        }
    }

    Err(CorralError::SignalSourceClosed { pid: pid.as_raw() })
}

/// Returns the status of `pid` if this reap collected it.
fn reap_exited(pid: Pid, reaper: &mut dyn ChildReaper) -> Result<Option<WaitStatus>> {
    let status = reaper.try_reap(pid).map_err(|source| CorralError::Reap {
        pid: pid.as_raw(),
        source,
    })?;
    Ok((status.pid() == Some(pid)).then_some(status))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use nix::errno::Errno;

    use super::*;

    /// Replays scripted wait results and records every reap attempt.
    #[derive(Default)]
    struct ScriptedReaper {
        results: VecDeque<nix::Result<WaitStatus>>,
        calls: Vec<Pid>,
    }

    impl ScriptedReaper {
        fn new(results: impl IntoIterator<Item = nix::Result<WaitStatus>>) -> Self {
            Self {
                results: results.into_iter().collect(),
                calls: Vec::new(),
            }
        }
    }

    impl ChildReaper for ScriptedReaper {
        fn try_reap(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
            self.calls.push(pid);
            self.results.pop_front().unwrap_or(Ok(WaitStatus::StillAlive))
        }
    }

    /// Scripts a child still running when monitoring starts.
    fn running_then(
        results: impl IntoIterator<Item = nix::Result<WaitStatus>>,
    ) -> ScriptedReaper {
        ScriptedReaper::new(std::iter::once(Ok(WaitStatus::StillAlive)).chain(results))
    }

    fn stream(signals: &[Signal]) -> impl Iterator<Item = Result<Signal>> {
        signals.to_vec().into_iter().map(Ok)
    }

    const CHILD: Pid = Pid::from_raw(4242);

    #[test]
    fn returns_status_of_monitored_child() {
        let mut reaper = running_then([Ok(WaitStatus::Exited(CHILD, 3))]);
        let status = monitor_child(CHILD, &mut stream(&[Signal::SIGCHLD]), &mut reaper).unwrap();
        assert_eq!(status, WaitStatus::Exited(CHILD, 3));
        assert_eq!(reaper.calls, vec![CHILD, CHILD]);
    }

    #[test]
    fn child_exited_before_monitoring_is_reaped_without_a_signal() {
        let mut reaper = ScriptedReaper::new([Ok(WaitStatus::Exited(CHILD, 0))]);
        let mut signals = std::iter::empty::<Result<Signal>>();
        let status = monitor_child(CHILD, &mut signals, &mut reaper).unwrap();
        assert_eq!(status, WaitStatus::Exited(CHILD, 0));
        assert_eq!(reaper.calls, vec![CHILD]);
    }

    #[test]
    fn initial_reap_failure_is_returned() {
        let mut reaper = ScriptedReaper::new([Err(Errno::ECHILD)]);
        let err = monitor_child(CHILD, &mut stream(&[Signal::SIGCHLD]), &mut reaper).unwrap_err();
        assert!(matches!(err, CorralError::Reap { pid: 4242, .. }));
        assert_eq!(reaper.calls.len(), 1);
    }

    #[test]
    fn sibling_exit_keeps_waiting() {
        let mut reaper = running_then([
            Ok(WaitStatus::StillAlive),
            Ok(WaitStatus::Exited(Pid::from_raw(7), 0)),
            Ok(WaitStatus::Signaled(CHILD, Signal::SIGKILL, false)),
        ]);
        let mut signals = stream(&[Signal::SIGCHLD, Signal::SIGCHLD, Signal::SIGCHLD]);
        let status = monitor_child(CHILD, &mut signals, &mut reaper).unwrap();
        assert_eq!(status, WaitStatus::Signaled(CHILD, Signal::SIGKILL, false));
        assert_eq!(reaper.calls.len(), 4);
    }

    #[test]
    fn foreign_signal_interrupts_without_reaping() {
        let mut reaper = ScriptedReaper::default();
        let err = monitor_child(CHILD, &mut stream(&[Signal::SIGTERM]), &mut reaper).unwrap_err();
        assert!(matches!(err, CorralError::Interrupted { ref signal } if signal == "SIGTERM"));
        assert_eq!(reaper.calls, vec![CHILD]);
    }

    #[test]
    fn foreign_signal_after_sibling_exit_interrupts() {
        let mut reaper = running_then([Ok(WaitStatus::StillAlive)]);
        let mut signals = stream(&[Signal::SIGCHLD, Signal::SIGINT, Signal::SIGCHLD]);
        let err = monitor_child(CHILD, &mut signals, &mut reaper).unwrap_err();
        assert!(matches!(err, CorralError::Interrupted { ref signal } if signal == "SIGINT"));
        assert_eq!(reaper.calls.len(), 2);
    }

    #[test]
    fn reap_failure_is_returned() {
        let mut reaper = running_then([Err(Errno::ECHILD)]);
        let err = monitor_child(CHILD, &mut stream(&[Signal::SIGCHLD]), &mut reaper).unwrap_err();
        assert!(matches!(
            err,
            CorralError::Reap {
                pid: 4242,
                source: Errno::ECHILD
            }
        ));
    }

    #[test]
    fn signal_wait_error_is_returned() {
        let mut reaper = ScriptedReaper::default();
        let mut signals = std::iter::once(Err(CorralError::SignalWait {
            source: Errno::EINTR,
        }));
        let err = monitor_child(CHILD, &mut signals, &mut reaper).unwrap_err();
        assert!(matches!(err, CorralError::SignalWait { .. }));
    }

    #[test]
    fn exhausted_stream_is_an_error() {
        let mut reaper = ScriptedReaper::default();
        let err = monitor_child(CHILD, &mut stream(&[Signal::SIGCHLD]), &mut reaper).unwrap_err();
        assert!(matches!(err, CorralError::SignalSourceClosed { pid: 4242 }));
    }
}
