//! Formatted output helpers for CLI commands.

use std::time::Duration;

use corral_runtime::stop::StopOutcome;

/// Formats an elapsed time for humans (e.g., "850ms", "2.3s").
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Short label for how an instance stopped.
#[must_use]
pub const fn outcome_label(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Exited => "stopped",
        StopOutcome::Killed => "killed",
        StopOutcome::KillIssued => "kill-sent",
    }
}
