//! Build script phases and the shell that runs them.

use std::process::{Command, Stdio};

use corral_common::constants::{SCRIPT_SHELL, SCRIPT_SHELL_FLAGS};
use corral_common::error::{CorralError, Result};
use corral_common::types::PhaseName;

/// One named build-time hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPhase {
    /// Which recipe section this phase comes from.
    pub name: PhaseName,
    /// Shell command string.
    pub command: String,
    /// Whether the section is present and selected.
    pub enabled: bool,
    /// Whether this phase must complete before the engine exits.
    pub must_run_before_exit: bool,
}

impl ScriptPhase {
    /// Returns whether the phase takes part in this build.
    #[must_use]
    pub const fn should_run(&self) -> bool {
        self.enabled && self.must_run_before_exit
    }
}

/// Executes a script phase to completion.
pub trait ScriptRunner: Send {
    /// Runs `phase` with the given environment and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Launch`] if the process cannot be started and
    /// [`CorralError::PhaseFailed`] if it exits unsuccessfully.
    fn run(&mut self, phase: &ScriptPhase, env: &[(String, String)]) -> Result<()>;
}

/// Runs phases through `/bin/sh -cex`, inheriting stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ScriptRunner for ShellRunner {
    fn run(&mut self, phase: &ScriptPhase, env: &[(String, String)]) -> Result<()> {
        let mut command = Command::new(SCRIPT_SHELL);
        let _ = command
            .arg(SCRIPT_SHELL_FLAGS)
            .arg(&phase.command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if !env.is_empty() {
            let _ = command.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }

        let mut child = command.spawn().map_err(|source| CorralError::Launch {
            phase: phase.name.as_str(),
            source,
        })?;
        tracing::debug!(phase = %phase.name, pid = child.id(), "script phase started");

        let status = child.wait().map_err(|source| CorralError::Io {
            path: SCRIPT_SHELL.into(),
            source,
        })?;
        if !status.success() {
            return Err(CorralError::PhaseFailed {
                phase: phase.name.as_str(),
                status,
            });
        }
        Ok(())
    }
}

/// Splits `KEY=VALUE` bindings, keeping their order.
///
/// Entries without `=` or with an empty key are skipped.
#[must_use]
pub fn parse_env_bindings(bindings: &[String]) -> Vec<(String, String)> {
    bindings
        .iter()
        .filter_map(|binding| match binding.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_owned(), value.to_owned())),
            _ => {
                tracing::warn!(binding = %binding, "ignoring malformed environment binding");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(command: &str) -> ScriptPhase {
        ScriptPhase {
            name: PhaseName::Post,
            command: command.into(),
            enabled: true,
            must_run_before_exit: true,
        }
    }

    #[test]
    fn parse_env_keeps_order_and_splits_on_first_equals() {
        let env = parse_env_bindings(&[
            "PATH=/usr/bin:/bin".into(),
            "OPTS=a=b".into(),
            "EMPTY=".into(),
        ]);
        assert_eq!(
            env,
            vec![
                ("PATH".into(), "/usr/bin:/bin".into()),
                ("OPTS".into(), "a=b".into()),
                ("EMPTY".into(), String::new()),
            ]
        );
    }

    #[test]
    fn parse_env_skips_malformed_entries() {
        let env = parse_env_bindings(&["NOEQUALS".into(), "=value".into(), "OK=1".into()]);
        assert_eq!(env, vec![("OK".into(), "1".into())]);
    }

    #[test]
    fn should_run_requires_both_flags() {
        let mut p = phase("true");
        assert!(p.should_run());
        p.must_run_before_exit = false;
        assert!(!p.should_run());
        p.must_run_before_exit = true;
        p.enabled = false;
        assert!(!p.should_run());
    }

    #[test]
    fn shell_runner_succeeds_on_zero_exit() {
        ShellRunner.run(&phase("true"), &[]).expect("phase should succeed");
    }

    #[test]
    fn shell_runner_reports_non_zero_exit() {
        let err = ShellRunner.run(&phase("exit 3"), &[]).unwrap_err();
        assert!(matches!(
            err,
            CorralError::PhaseFailed { phase: "post", status } if status.code() == Some(3)
        ));
    }

    #[test]
    fn shell_runner_passes_explicit_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("env.txt");
        let cmd = format!("echo \"$GREETING\" > {}", out.display());
        let env = vec![("GREETING".to_string(), "hello".to_string())];
        ShellRunner.run(&phase(&cmd), &env).expect("phase should succeed");
        let written = std::fs::read_to_string(&out).expect("read");
        assert_eq!(written.trim(), "hello");
    }

    #[test]
    fn shell_runner_clears_unlisted_variables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("home.txt");
        let cmd = format!("echo \"[$HOME]\" > {}", out.display());
        let env = vec![("ONLY".to_string(), "1".to_string())];
        ShellRunner.run(&phase(&cmd), &env).expect("phase should succeed");
        let written = std::fs::read_to_string(&out).expect("read");
        assert_eq!(written.trim(), "[]");
    }
}
