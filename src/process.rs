use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::watch;

use crate::error::RunnerError;
use crate::path::{find_or, system_fallback};
use crate::policy::{OutputMode, PipeInfo, StandardStream};
use crate::session::{Output, Session};
use crate::state::RunState;

/// Launches one executable, any number of times, with fixed environment
/// and working directory.
#[derive(Debug, Clone)]
pub struct Runner {
    executable: PathBuf,
    environment: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl Runner {
    /// Runner for an explicit executable path, inheriting our environment
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            environment: inherited_environment(),
            cwd: None,
        }
    }

    /// Runner for a command name, looked up in `PATH`.
    ///
    /// Falls back to `/usr/bin/<name>` if the lookup fails; a wrong guess
    /// shows up later as a startup failure.
    pub fn for_command(name: &str) -> Self {
        Self::new(find_or(name, system_fallback(name)))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn set_cwd(&mut self, cwd: Option<PathBuf>) -> &mut Self {
        self.cwd = cwd;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Environment handed to the child
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn env_remove(&mut self, key: &str) -> &mut Self {
        self.environment.remove(key);
        self
    }

    pub fn env_clear(&mut self) -> &mut Self {
        self.environment.clear();
        self
    }

    /// Start the executable and return its session immediately.
    ///
    /// Must be called from within a tokio runtime: the stream drains and
    /// the exit wait run as tasks on it. A launch failure does not return
    /// an error; it is reported as [`RunState::StartupFailure`] through
    /// the session's state, with both outputs empty.
    pub fn run<I, S>(&self, args: I, stdout_mode: OutputMode, stderr_mode: OutputMode) -> Session
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = PipeInfo::decide(stdout_mode, StandardStream::Stdout);
        let stderr = PipeInfo::decide(stderr_mode, StandardStream::Stderr);

        let mut command = tokio::process::Command::from(self.command(args));
        command.stdout(stdout.stdio()).stderr(stderr.stdio());

        let (pid, state) = match command.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                tracing::debug!(
                    executable = %self.executable.display(),
                    pid = ?pid,
                    "launched"
                );
                stdout.attach(child.stdout.take());
                stderr.attach(child.stderr.take());

                let (notify, state) = watch::channel(None);
                tokio::spawn(async move {
                    let state = match child.wait().await {
                        Ok(status) => RunState::from(status),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to wait for process");
                            RunState::Unknown
                        }
                    };
                    tracing::debug!(%state, "process exited");
                    notify.send_replace(Some(state));
                });
                (pid, state)
            }
            Err(source) => {
                let error = RunnerError::Launch {
                    executable: self.executable.clone(),
                    source,
                };
                tracing::warn!(%error, "launch failed");
                stdout.attach(None::<ChildStdout>);
                stderr.attach(None::<ChildStderr>);

                let (_notify, state) =
                    watch::channel(Some(RunState::StartupFailure(error.to_string())));
                (None, state)
            }
        };

        Session::new(
            pid,
            Output::new(stdout.mode(), stdout.buffer()),
            Output::new(stderr.mode(), stderr.buffer()),
            state,
        )
    }

    /// [`Runner::run`] capturing both streams
    pub fn run_captured<I, S>(&self, args: I) -> Session
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run(args, OutputMode::Capture, OutputMode::Capture)
    }

    /// Replace the current process with the executable.
    ///
    /// Only returns if the replacement could not happen.
    pub fn exec<I, S>(&self, args: I) -> RunnerError
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        tracing::debug!(executable = %self.executable.display(), "exec");
        let source = self.command(args).exec();
        RunnerError::Exec {
            executable: self.executable.clone(),
            source,
        }
    }

    fn command<I, S>(&self, args: I) -> std::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = std::process::Command::new(&self.executable);
        command.args(args).env_clear().envs(&self.environment);
        if let Some(ref cwd) = self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

/// Our own environment, skipping entries that are not valid UTF-8
fn inherited_environment() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}
