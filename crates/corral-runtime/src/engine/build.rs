//! Image build engine.
//!
//! Runs the recipe's `%post` and `%test` sections inside the staged
//! container, then finishes. It builds something once and serves nothing
//! afterwards, so its post-start and cleanup hooks stay no-ops.

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::PhaseName;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use super::monitor::{ChildReaper, SystemReaper, monitor_child};
use super::script::{ScriptPhase, ScriptRunner, ShellRunner, parse_env_bindings};
use super::{EngineOperations, EngineOutcome};
use crate::signal::{SignalStream, SystemSignals};

/// Section selector that enables every section.
pub const ALL_SECTIONS: &str = "all";

/// Section selector that disables every section.
pub const NO_SECTIONS: &str = "none";

/// Script sections of a build recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildData {
    /// `%post` commands.
    pub post: String,
    /// `%test` commands.
    pub test: String,
}

/// The parts of a build recipe this engine consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipe {
    /// Build-time script sections.
    pub build_data: BuildData,
}

/// Process section of the container's OCI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OciProcess {
    /// Ordered `KEY=VALUE` environment bindings.
    pub env: Vec<String>,
}

/// Container OCI configuration, reduced to what script phases need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OciConfig {
    /// Process configuration.
    pub process: OciProcess,
}

/// Configuration of one build engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildEngineConfig {
    /// Recipe being built.
    pub recipe: Recipe,
    /// Sections selected for this run (`all`, `none`, or section names).
    pub sections: Vec<String>,
    /// Suppress the `%test` section globally.
    pub no_test: bool,
    /// Container process configuration.
    pub oci_config: OciConfig,
}

impl Default for BuildEngineConfig {
    fn default() -> Self {
        Self {
            recipe: Recipe::default(),
            sections: vec![ALL_SECTIONS.to_owned()],
            no_test: false,
            oci_config: OciConfig::default(),
        }
    }
}

impl BuildEngineConfig {
    /// Loads a JSON engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CorralError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded build engine config");
        Ok(config)
    }

    /// Returns whether `section` is selected for this run.
    #[must_use]
    pub fn run_section(&self, section: &str) -> bool {
        if self.sections.first().is_some_and(|s| s == NO_SECTIONS) {
            return false;
        }
        self.sections
            .iter()
            .any(|s| s == ALL_SECTIONS || s == section)
    }

    /// Script phases in execution order.
    #[must_use]
    pub fn phases(&self) -> Vec<ScriptPhase> {
        let data = &self.recipe.build_data;
        vec![
            ScriptPhase {
                name: PhaseName::Post,
                command: data.post.clone(),
                enabled: self.run_section(PhaseName::Post.as_str()) && !data.post.is_empty(),
                must_run_before_exit: true,
            },
            ScriptPhase {
                name: PhaseName::Test,
                command: data.test.clone(),
                enabled: self.run_section(PhaseName::Test.as_str()) && !data.test.is_empty(),
                must_run_before_exit: !self.no_test,
            },
        ]
    }

    /// Environment handed to every script phase.
    #[must_use]
    pub fn environment(&self) -> Vec<(String, String)> {
        parse_env_bindings(&self.oci_config.process.env)
    }
}

/// Engine that runs build script phases.
pub struct BuildEngine {
    config: BuildEngineConfig,
    runner: Box<dyn ScriptRunner>,
    reaper: Box<dyn ChildReaper>,
    signals: Option<SignalStream>,
}

impl BuildEngine {
    /// Creates an engine that runs phases through the system shell.
    #[must_use]
    pub fn new(config: BuildEngineConfig) -> Self {
        Self {
            config,
            runner: Box::new(ShellRunner),
            reaper: Box::new(SystemReaper),
            signals: None,
        }
    }

    /// Replaces the script runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replaces the child reaper used while monitoring.
    #[must_use]
    pub fn with_reaper(mut self, reaper: Box<dyn ChildReaper>) -> Self {
        self.reaper = reaper;
        self
    }

    /// Supplies the signal source used while monitoring.
    ///
    /// Hosts should subscribe before forking the container process. When
    /// no source is supplied, [`SystemSignals`] is subscribed on the first
    /// call to [`EngineOperations::monitor_container`]; a child that exited
    /// before that is still collected by the initial reap.
    #[must_use]
    pub fn with_signals(mut self, signals: SignalStream) -> Self {
        self.signals = Some(signals);
        self
    }

}

impl std::fmt::Debug for BuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEngine")
            .field("config", &self.config)
            .field("subscribed", &self.signals.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineOperations for BuildEngine {
    fn start_process(&mut self, master: &UnixStream) -> EngineOutcome {
        tracing::debug!(fd = master.as_raw_fd(), "master connection ready");

        let env = self.config.environment();
        for phase in self.config.phases() {
            if !phase.should_run() {
                tracing::debug!(phase = %phase.name, "skipping script phase");
                continue;
            }
            tracing::info!(phase = %phase.name, "running {} scriptlet", phase.name);
            if let Err(e) = self.runner.run(&phase, &env) {
                tracing::error!(phase = %phase.name, error = %e, "script phase failed");
                return EngineOutcome::Fatal(e);
            }
        }

        tracing::info!("build scriptlets completed");
        EngineOutcome::Success
    }

    fn monitor_container(&mut self, pid: Pid) -> Result<WaitStatus> {
        if self.signals.is_none() {
            self.signals = Some(SystemSignals::subscribe()?.into_stream());
        }
        let Some(signals) = self.signals.as_mut() else {
            return Err(CorralError::SignalSourceClosed { pid: pid.as_raw() });
        };
        monitor_child(pid, signals.as_mut(), self.reaper.as_mut())
    }

    fn cleanup_container(&mut self) -> Result<()> {
        Ok(())
    }

    fn post_start_process(&mut self, _pid: Pid) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use nix::sys::signal::Signal;

    use super::*;

    /// Records executed phases and fails the ones listed in `fail`.
    #[derive(Clone, Default)]
    struct RecordingRunner {
        ran: Arc<Mutex<Vec<PhaseName>>>,
        env_seen: Arc<Mutex<Vec<(String, String)>>>,
        fail: Vec<PhaseName>,
    }

    impl ScriptRunner for RecordingRunner {
        fn run(&mut self, phase: &ScriptPhase, env: &[(String, String)]) -> Result<()> {
            self.ran.lock().unwrap().push(phase.name);
            *self.env_seen.lock().unwrap() = env.to_vec();
            if self.fail.contains(&phase.name) {
                return Err(CorralError::Launch {
                    phase: phase.name.as_str(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(())
        }
    }

    fn config(post: &str, test: &str) -> BuildEngineConfig {
        BuildEngineConfig {
            recipe: Recipe {
                build_data: BuildData {
                    post: post.into(),
                    test: test.into(),
                },
            },
            ..BuildEngineConfig::default()
        }
    }

    fn run(config: BuildEngineConfig, runner: &RecordingRunner) -> EngineOutcome {
        let (master, _peer) = UnixStream::pair().unwrap();
        let mut engine = BuildEngine::new(config).with_runner(Box::new(runner.clone()));
        engine.start_process(&master)
    }

    #[test]
    fn post_runs_before_test() {
        let runner = RecordingRunner::default();
        let outcome = run(config("echo post", "echo test"), &runner);
        assert!(outcome.is_success());
        assert_eq!(*runner.ran.lock().unwrap(), vec![PhaseName::Post, PhaseName::Test]);
    }

    #[test]
    fn failing_post_prevents_test() {
        let runner = RecordingRunner {
            fail: vec![PhaseName::Post],
            ..RecordingRunner::default()
        };
        let outcome = run(config("false", "echo test"), &runner);
        assert!(matches!(outcome, EngineOutcome::Fatal(CorralError::Launch { phase: "post", .. })));
        assert_eq!(*runner.ran.lock().unwrap(), vec![PhaseName::Post]);
    }

    #[test]
    fn empty_test_section_runs_only_post() {
        let runner = RecordingRunner::default();
        let outcome = run(config("echo post", ""), &runner);
        assert!(outcome.is_success());
        assert_eq!(*runner.ran.lock().unwrap(), vec![PhaseName::Post]);
    }

    #[test]
    fn no_test_suppresses_test_without_failing() {
        let runner = RecordingRunner::default();
        let mut cfg = config("echo post", "echo test");
        cfg.no_test = true;
        assert!(run(cfg, &runner).is_success());
        assert_eq!(*runner.ran.lock().unwrap(), vec![PhaseName::Post]);
    }

    #[test]
    fn section_selection_limits_phases() {
        let runner = RecordingRunner::default();
        let mut cfg = config("echo post", "echo test");
        cfg.sections = vec!["test".into()];
        assert!(run(cfg, &runner).is_success());
        assert_eq!(*runner.ran.lock().unwrap(), vec![PhaseName::Test]);
    }

    #[test]
    fn none_disables_every_section() {
        let mut cfg = config("echo post", "echo test");
        cfg.sections = vec![NO_SECTIONS.into(), "post".into()];
        assert!(!cfg.run_section("post"));
        assert!(cfg.phases().iter().all(|p| !p.should_run()));
    }

    #[test]
    fn phases_receive_oci_environment() {
        let runner = RecordingRunner::default();
        let mut cfg = config("echo post", "");
        cfg.oci_config.process.env = vec!["PATH=/bin".into(), "LANG=C".into()];
        assert!(run(cfg, &runner).is_success());
        assert_eq!(
            *runner.env_seen.lock().unwrap(),
            vec![("PATH".into(), "/bin".into()), ("LANG".into(), "C".into())]
        );
    }

    #[test]
    fn failing_shell_post_never_starts_test() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("test-ran");
        let cfg = config("exit 1", &format!("touch {}", marker.display()));
        let (master, _peer) = UnixStream::pair().unwrap();
        let outcome = BuildEngine::new(cfg).start_process(&master);
        assert!(matches!(outcome, EngineOutcome::Fatal(CorralError::PhaseFailed { phase: "post", .. })));
        assert_eq!(outcome.exit_code(), 255);
        assert!(!marker.exists());
    }

    #[test]
    fn shell_phases_run_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("order");
        let cfg = config(
            &format!("echo post >> {}", log.display()),
            &format!("echo test >> {}", log.display()),
        );
        let (master, _peer) = UnixStream::pair().unwrap();
        let outcome = BuildEngine::new(cfg).start_process(&master);
        assert_eq!(outcome.exit_code(), 0);
        let order = std::fs::read_to_string(&log).expect("read");
        assert_eq!(order, "post\ntest\n");
    }

    #[test]
    fn config_parses_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{
                "recipe": { "build_data": { "post": "apt-get update" } },
                "no_test": true,
                "oci_config": { "process": { "env": ["HOME=/root"] } }
            }"#,
        )
        .unwrap();
        let cfg = BuildEngineConfig::load(&path).expect("load");
        assert_eq!(cfg.recipe.build_data.post, "apt-get update");
        assert!(cfg.recipe.build_data.test.is_empty());
        assert_eq!(cfg.sections, vec![ALL_SECTIONS.to_string()]);
        assert!(cfg.no_test);
    }

    #[test]
    fn hooks_are_no_ops() {
        let mut engine = BuildEngine::new(BuildEngineConfig::default());
        assert!(engine.post_start_process(Pid::from_raw(1234)).is_ok());
        assert!(engine.cleanup_container().is_ok());
    }

    #[test]
    fn monitor_uses_supplied_signals() {
        /// Still running at the first reap, exited at the next one.
        #[derive(Default)]
        struct ExitsOnSignal {
            reaped: bool,
        }
        impl ChildReaper for ExitsOnSignal {
            fn try_reap(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
                if std::mem::replace(&mut self.reaped, true) {
                    Ok(WaitStatus::Exited(pid, 0))
                } else {
                    Ok(WaitStatus::StillAlive)
                }
            }
        }

        let signals: SignalStream = Box::new(std::iter::once(Ok(Signal::SIGCHLD)));
        let mut engine = BuildEngine::new(BuildEngineConfig::default())
            .with_reaper(Box::new(ExitsOnSignal::default()))
            .with_signals(signals);
        let pid = Pid::from_raw(99);
        assert_eq!(engine.monitor_container(pid).unwrap(), WaitStatus::Exited(pid, 0));
    }
}
