//! Incoming signal delivery and signal name parsing.
//!
//! The supervisor never installs handlers. Instead it blocks every
//! signal for the calling thread and pulls them one at a time with
//! `sigwait(3)`, which turns asynchronous delivery into an ordinary
//! blocking iterator.

use std::str::FromStr;

use corral_common::error::{CorralError, Result};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};

/// A lazy, infinite, non-restartable sequence of received signals.
///
/// The system implementation is [`SystemSignals`]; tests substitute any
/// iterator, e.g. `vec![Ok(Signal::SIGCHLD)].into_iter()`.
pub type SignalStream = Box<dyn Iterator<Item = Result<Signal>> + Send>;

/// Signals delivered to this process, received synchronously.
///
/// Subscribing blocks all signals on the calling thread. Subscribe on the
/// main thread before forking any child and before spawning threads,
/// otherwise a `SIGCHLD` may be delivered elsewhere and lost. The previous
/// mask is restored on drop.
#[derive(Debug)]
pub struct SystemSignals {
    set: SigSet,
    previous: SigSet,
}

impl SystemSignals {
    /// Blocks every signal on the current thread and starts receiving.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::SignalWait`] if the signal mask cannot be
    /// changed.
    pub fn subscribe() -> Result<Self> {
        let set = SigSet::all();
        let previous = set
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .map_err(|source| CorralError::SignalWait { source })?;
        tracing::debug!("subscribed to all signals");
        Ok(Self { set, previous })
    }

    /// Boxes this source into a [`SignalStream`].
    #[must_use]
    pub fn into_stream(self) -> SignalStream {
        Box::new(self)
    }
}

impl Iterator for SystemSignals {
    type Item = Result<Signal>;

    fn next(&mut self) -> Option<Self::Item> {
        let received = self
            .set
            .wait()
            .map_err(|source| CorralError::SignalWait { source });
        if let Ok(signal) = &received {
            tracing::debug!(signal = signal.as_str(), "signal received");
        }
        Some(received)
    }
}

impl Drop for SystemSignals {
    fn drop(&mut self) {
        if let Err(e) = self.previous.thread_set_mask() {
            tracing::warn!(error = %e, "failed to restore signal mask");
        }
    }
}

/// Parses a signal given by name or number.
///
/// Accepts `TERM`, `SIGTERM`, `sigterm` and `15` alike.
///
/// # Errors
///
/// Returns [`CorralError::Config`] if the value names no known signal.
pub fn parse_signal(value: &str) -> Result<Signal> {
    let value = value.trim();
    let invalid = || CorralError::Config {
        message: format!("unknown signal {value:?}"),
    };

    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| invalid());
    }

    let upper = value.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| invalid())
}
