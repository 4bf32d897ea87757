//! `corral build` — Run the build scriptlets of a staged container.
//!
//! Acts as the engine host: it loads the engine configuration, runs the
//! build engine and turns its outcome into this process's exit code.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use corral_runtime::engine::build::{BuildEngine, BuildEngineConfig};
use corral_runtime::engine::{EngineOperations, EngineOutcome};

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the JSON build engine configuration.
    pub config: PathBuf,

    /// Skip the %test section.
    #[arg(long, env = "CORRAL_NOTEST")]
    pub notest: bool,

    /// Only run these sections (`all`, `none`, `post`, `test`).
    #[arg(long, value_delimiter = ',')]
    pub section: Vec<String>,
}

impl BuildArgs {
    /// Loads the engine configuration and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn engine_config(&self) -> anyhow::Result<BuildEngineConfig> {
        let mut config = BuildEngineConfig::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if self.notest {
            config.no_test = true;
        }
        if !self.section.is_empty() {
            config.sections.clone_from(&self.section);
        }
        Ok(config)
    }
}

/// Executes the `build` command.
///
/// Does not return once the engine ran: the process exits with 0 on
/// success and 255 on a fatal scriptlet failure.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the master
/// connection cannot be opened.
pub fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let config = args.engine_config()?;
    let (master, _controller_end) =
        UnixStream::pair().context("failed to open master connection")?;

    let mut engine = BuildEngine::new(config);
    let outcome = engine.start_process(&master);
    if let EngineOutcome::Fatal(ref e) = outcome {
        eprintln!("FATAL: {e}");
    }

    let flushed = flush_diagnostics(&mut std::io::stdout(), &mut std::io::stderr());
    tracing::debug!(flushed, code = outcome.exit_code(), "engine host exiting");
    std::process::exit(outcome.exit_code());
}

/// Flushes both output streams, logging any stream that fails.
fn flush_diagnostics(stdout: &mut dyn Write, stderr: &mut dyn Write) -> bool {
    let out = flush_stream("stdout", stdout);
    let err = flush_stream("stderr", stderr);
    out && err
}

fn flush_stream(stream: &str, writer: &mut dyn Write) -> bool {
    match writer.flush() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(stream, error = %e, "failed to flush output");
            false
        }
    }
}
