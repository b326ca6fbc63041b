use std::path::PathBuf;

use thiserror::Error;

/// Exit codes used by the `procrun` binary for its own failures
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    RuntimeError = 1,
    InvalidArguments = 2,
    CannotExecute = 126,
    NotFound = 127,
}

impl ReturnCode {
    pub fn as_exit_code(self) -> i32 {
        self as i32
    }
}

/// Main error type for process execution
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to launch {}: {source}", .executable.display())]
    Launch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to exec {}: {source}", .executable.display())]
    Exec {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl RunnerError {
    /// Convert error to the appropriate return code
    pub fn to_return_code(&self) -> ReturnCode {
        match self {
            RunnerError::Launch { source, .. } | RunnerError::Exec { source, .. } => {
                match source.kind() {
                    std::io::ErrorKind::NotFound => ReturnCode::NotFound,
                    std::io::ErrorKind::PermissionDenied => ReturnCode::CannotExecute,
                    _ => ReturnCode::RuntimeError,
                }
            }
            RunnerError::InvariantViolation(_) => ReturnCode::RuntimeError,
            RunnerError::InvalidArguments(_) => ReturnCode::InvalidArguments,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.to_return_code().as_exit_code()
    }
}

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

impl From<RunnerError> for i32 {
    fn from(error: RunnerError) -> Self {
        error.exit_code()
    }
}
