//! CLI command definitions and dispatch.

pub mod build;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_common::config::CorralConfig;

/// Corral — container instance lifecycle.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for instance records and runtime data.
    #[arg(long, global = true, env = "CORRAL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    /// Builds the runtime configuration for this invocation.
    #[must_use]
    pub fn config(&self) -> CorralConfig {
        self.data_dir
            .clone()
            .map_or_else(CorralConfig::default, CorralConfig::with_data_dir)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stop one or all running instances.
    Stop(stop::StopArgs),
    /// Run the build scriptlets of a staged container.
    Build(build::BuildArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Stop(args) => stop::execute(args, &config),
        Command::Build(args) => build::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let cli = Cli::try_parse_from(["corral", "--data-dir", "/tmp/c", "stop", "-a"])
            .expect("parse");
        assert_eq!(cli.config().instance_dir, PathBuf::from("/tmp/c/instances"));
    }
}
