//! `corral stop` — Stop running instances.

use std::time::Duration;

use clap::{Args, CommandFactory};
use corral_common::config::CorralConfig;
use corral_common::constants::WILDCARD;
use corral_runtime::registry::FileRegistry;
use corral_runtime::signal::parse_signal;
use corral_runtime::stop::{StopPolicy, SystemSignaler, TerminationController, TerminationRequest};
use corral_runtime::user::authorize_owner;
use nix::sys::signal::Signal;

use super::Cli;
use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Name of the instance to stop.
    pub instance: Option<String>,

    /// Act on instances of another user (root only).
    #[arg(short, long, value_name = "USERNAME")]
    pub user: Option<String>,

    /// Stop every instance of the user. Wins over an instance name.
    #[arg(short, long, env = "CORRAL_STOP_ALL")]
    pub all: bool,

    /// Kill immediately instead of waiting for a graceful exit.
    #[arg(short, long, env = "CORRAL_STOP_FORCE")]
    pub force: bool,

    /// Signal sent to the instance (name or number).
    #[arg(short, long, value_name = "SIGNAL", value_parser = signal_arg, env = "CORRAL_STOP_SIGNAL")]
    pub signal: Option<Signal>,

    /// Seconds to wait before force-killing instances that did not stop.
    /// Defaults to the configured stop timeout.
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

impl StopArgs {
    /// The instance name to act on, if the invocation names any.
    ///
    /// `--all` wins over a positional name.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        if self.all {
            return Some(WILDCARD.to_owned());
        }
        self.instance.clone().filter(|name| !name.is_empty())
    }

    /// Grace period before escalation, `--timeout` or the configured one.
    #[must_use]
    pub fn grace_period(&self, config: &CorralConfig) -> Duration {
        self.timeout
            .map_or_else(|| config.stop_timeout(), Duration::from_secs)
    }
}

fn signal_arg(value: &str) -> Result<Signal, String> {
    parse_signal(value).map_err(|e| e.to_string())
}

/// Executes the `stop` command.
///
/// Without a target this prints usage and does nothing.
///
/// # Errors
///
/// Returns an error if the user cannot act on the owner's instances, the
/// named instance does not exist, or any instance failed to stop.
pub fn execute(args: StopArgs, config: &CorralConfig) -> anyhow::Result<()> {
    let Some(target) = args.target() else {
        let mut cli = Cli::command();
        cli.build();
        if let Some(stop) = cli.find_subcommand_mut("stop") {
            stop.print_help()?;
        }
        return Ok(());
    };

    let owner = authorize_owner(args.user.as_deref())?;
    let mut request = TerminationRequest::new(target, owner)
        .with_force(args.force)
        .with_grace_period(args.grace_period(config));
    if let Some(signal) = args.signal {
        request = request.with_signal(signal);
    }
    tracing::debug!(?request, "stop request");

    let controller = TerminationController::new(
        Box::new(FileRegistry::from_config(config)),
        Box::new(SystemSignaler),
    )
    .with_policy(StopPolicy::from(config));

    let report = controller.stop(request)?;
    if report.total() == 0 {
        println!("No instances found.");
        return Ok(());
    }

    for stopped in &report.stopped {
        println!(
            "{:<20} {:<8} {:<10} {}",
            stopped.instance.name,
            stopped.instance.pid,
            output::outcome_label(stopped.outcome),
            output::format_elapsed(stopped.elapsed)
        );
    }
    for (instance, error) in &report.failures {
        eprintln!("error: {instance}: {error}");
    }

    let _ = report.into_result()?;
    Ok(())
}
