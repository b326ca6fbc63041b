use std::fmt;
use std::process::ExitStatus;

/// Final disposition of a child process
///
/// Only equality is meaningful; there is no ordering between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Exited with status 0
    Succeeded,
    /// Exited with a non-zero status, reported verbatim
    Failed(i32),
    /// Terminated by a signal it did not handle
    UncaughtSignal,
    /// The process could not be launched
    StartupFailure(String),
    /// Anything else the OS reported
    Unknown,
}

impl RunState {
    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Succeeded)
    }

    /// Exit code `procrun` should use to mirror this state
    pub fn exit_code(&self) -> i32 {
        match self {
            RunState::Succeeded => 0,
            RunState::Failed(code) => *code,
            RunState::StartupFailure(_) => 127,
            RunState::UncaughtSignal | RunState::Unknown => 1,
        }
    }
}

impl From<ExitStatus> for RunState {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return if code == 0 {
                RunState::Succeeded
            } else {
                RunState::Failed(code)
            };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                tracing::debug!(signal = %signal_name(signal), "process terminated by signal");
                return RunState::UncaughtSignal;
            }
        }

        RunState::Unknown
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match nix::sys::signal::Signal::try_from(signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {signal}"),
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed(code) => write!(f, "failed with exit code {code}"),
            RunState::UncaughtSignal => write!(f, "terminated by uncaught signal"),
            RunState::StartupFailure(message) => write!(f, "failed to start: {message}"),
            RunState::Unknown => write!(f, "unknown termination"),
        }
    }
}
